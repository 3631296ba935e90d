use clap::{CommandFactory, Parser};
use clap_complete::Shell;
use hnk::render::{self, RenderOptions};
use hnk::{
    Analyzer, ClaudeCli, Config, Diff, DiffSource, Grouper, Hnk, NoAnalyzer, ResultCache,
    SemanticGroup,
};
use std::io;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "hnk", version)]
#[command(about = "Semantic git diff viewer - groups related hunks with explanations")]
struct Cli {
    /// Commit to show; treated as a path if it does not name a commit
    #[arg(value_name = "COMMIT")]
    args: Vec<String>,

    /// Limit the diff to these paths
    #[arg(last = true, value_name = "PATHS")]
    paths: Vec<String>,

    /// Show staged changes only
    #[arg(short, long)]
    staged: bool,

    /// Compare the working tree against a ref (branch, tag, commit)
    #[arg(short, long, value_name = "REF")]
    r#ref: Option<String>,

    /// Start ref for range comparison
    #[arg(long, requires = "to", value_name = "REF")]
    from: Option<String>,

    /// End ref for range comparison
    #[arg(long, requires = "from", value_name = "REF")]
    to: Option<String>,

    /// Claude model to use (haiku, sonnet, opus)
    #[arg(short, long)]
    model: Option<String>,

    /// Hide line numbers
    #[arg(long)]
    no_line_numbers: bool,

    /// Print groups as JSON
    #[arg(long)]
    json: bool,

    /// Skip the analyzer and group one hunk per change
    #[arg(long)]
    no_ai: bool,

    /// Remove all cached analyzer responses and exit
    #[arg(long)]
    clear_cache: bool,

    /// Enable debug logging on stderr
    #[arg(short, long)]
    verbose: bool,

    /// Print shell completions and exit
    #[arg(long, value_name = "SHELL")]
    completions: Option<Shell>,

    /// Print a man page and exit
    #[arg(long)]
    man: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(shell) = cli.completions {
        clap_complete::generate(shell, &mut Cli::command(), "hnk", &mut io::stdout());
        return Ok(());
    }
    if cli.man {
        clap_mangen::Man::new(Cli::command()).render(&mut io::stdout())?;
        return Ok(());
    }

    let config = Config::load();
    let cache = match config.cache_path() {
        Some(path) => ResultCache::open(path, config.cache_size_bytes()),
        None => ResultCache::in_memory(config.cache_size_bytes()),
    };

    if cli.clear_cache {
        let mut cache = cache;
        cache.clear();
        println!("Cache cleared");
        return Ok(());
    }

    let hnk = Hnk::new(".");
    let (source, paths) = select_source(&hnk, &cli);
    let diff = hnk.load_diff(&source, &paths)?;
    if diff.files.is_empty() {
        println!("{NO_CHANGES}");
        return Ok(());
    }

    let analyzer: Box<dyn Analyzer> = if cli.no_ai {
        Box::new(NoAnalyzer)
    } else {
        let model = cli.model.clone().unwrap_or_else(|| config.model.clone());
        Box::new(
            ClaudeCli::new(model)
                .with_binary(&config.claude_bin)
                .with_timeout(Duration::from_secs(config.timeout_secs)),
        )
    };

    let groups = Grouper::new(analyzer).with_cache(cache).group_diff(&diff);
    let format = if cli.json {
        Format::Json
    } else {
        Format::Plain(RenderOptions {
            line_numbers: config.line_numbers && !cli.no_line_numbers,
        })
    };
    print!("{}", output(&diff, &groups, format)?);

    Ok(())
}

const NO_CHANGES: &str = "No changes to display";

enum Format {
    Json,
    Plain(RenderOptions),
}

/// Text to print for the grouped diff. A diff whose files carry no hunks,
/// such as a pure rename, yields no groups and gets the no-changes message.
fn output(
    diff: &Diff,
    groups: &[SemanticGroup],
    format: Format,
) -> Result<String, serde_json::Error> {
    if groups.is_empty() {
        return Ok(format!("{NO_CHANGES}\n"));
    }
    Ok(match format {
        Format::Json => render::json(diff, groups)? + "\n",
        Format::Plain(options) => render::plain(diff, groups, options),
    })
}

/// Commit mode when the first positional names a commit, otherwise every
/// positional is a path. Precedence: commit, range, ref, staged, working tree.
fn select_source(hnk: &Hnk<'_>, cli: &Cli) -> (DiffSource, Vec<String>) {
    let (commit, mut paths) = match cli.args.split_first() {
        Some((first, rest)) if hnk.is_valid_ref(first) => (Some(first.clone()), rest.to_vec()),
        _ => (None, cli.args.clone()),
    };
    paths.extend(cli.paths.iter().cloned());

    let source = if let Some(commit) = commit {
        DiffSource::Commit(commit)
    } else if let (Some(from), Some(to)) = (&cli.from, &cli.to) {
        DiffSource::Range {
            from: from.clone(),
            to: to.clone(),
        }
    } else if let Some(reference) = &cli.r#ref {
        DiffSource::AgainstRef(reference.clone())
    } else if cli.staged {
        DiffSource::Staged
    } else {
        DiffSource::WorkingTree
    };

    (source, paths)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    fn offline(diff: &Diff) -> Vec<SemanticGroup> {
        Grouper::new(NoAnalyzer)
            .with_cache(ResultCache::in_memory(0))
            .group_diff(diff)
    }

    #[test]
    fn pure_rename_reports_no_changes() {
        let diff = Diff::parse(
            "diff --git a/a.txt b/b.txt\nsimilarity index 100%\nrename from a.txt\nrename to b.txt\n",
        )
        .unwrap();
        let groups = offline(&diff);
        assert!(groups.is_empty());

        assert_eq!(
            output(&diff, &groups, Format::Plain(RenderOptions::default())).unwrap(),
            "No changes to display\n"
        );
        assert_eq!(
            output(&diff, &groups, Format::Json).unwrap(),
            "No changes to display\n"
        );
    }

    #[test]
    fn grouped_changes_are_rendered() {
        let diff = Diff::parse("diff --git a/a.txt b/a.txt\n@@ -1 +1 @@\n-old\n+new\n").unwrap();
        let groups = offline(&diff);

        let plain = output(&diff, &groups, Format::Plain(RenderOptions::default())).unwrap();
        assert!(plain.starts_with("# Modify a.txt\n"));

        let json = output(&diff, &groups, Format::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["groups"][0]["title"], "Modify a.txt");
    }

    #[test]
    fn cli_flags_parse() {
        let cli = Cli::try_parse_from(["hnk", "--staged", "--json", "--", "src"]).unwrap();
        assert!(cli.staged && cli.json);
        assert_eq!(cli.paths, vec!["src".to_string()]);
        assert!(Cli::try_parse_from(["hnk", "--from", "main"]).is_err());
    }
}
