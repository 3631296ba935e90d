/// Tag used for paths with no known extension
pub const PLAIN_TEXT: &str = "text";

/// Extension suffix to language tag. Matching is case-sensitive and the
/// first suffix that matches wins.
const EXTENSIONS: &[(&str, &str)] = &[
    (".go", "go"),
    (".js", "javascript"),
    (".jsx", "jsx"),
    (".ts", "typescript"),
    (".tsx", "tsx"),
    (".py", "python"),
    (".rb", "ruby"),
    (".rs", "rust"),
    (".c", "c"),
    (".cpp", "cpp"),
    (".h", "c"),
    (".hpp", "cpp"),
    (".java", "java"),
    (".kt", "kotlin"),
    (".swift", "swift"),
    (".sh", "bash"),
    (".bash", "bash"),
    (".zsh", "zsh"),
    (".fish", "fish"),
    (".html", "html"),
    (".css", "css"),
    (".scss", "scss"),
    (".less", "less"),
    (".json", "json"),
    (".yaml", "yaml"),
    (".yml", "yaml"),
    (".toml", "toml"),
    (".xml", "xml"),
    (".md", "markdown"),
    (".sql", "sql"),
    (".php", "php"),
    (".lua", "lua"),
    (".vim", "vim"),
    (".el", "emacs-lisp"),
    (".clj", "clojure"),
    (".ex", "elixir"),
    (".exs", "elixir"),
    (".erl", "erlang"),
    (".hs", "haskell"),
    (".ml", "ocaml"),
    (".scala", "scala"),
    (".r", "r"),
    (".R", "r"),
    (".pl", "perl"),
    (".pm", "perl"),
    (".cs", "csharp"),
    (".fs", "fsharp"),
    (".tf", "terraform"),
    (".proto", "protobuf"),
    (".graphql", "graphql"),
    (".gql", "graphql"),
    (".nix", "nix"),
];

/// Language tag for a path, derived from its extension
pub fn detect(path: &str) -> &'static str {
    EXTENSIONS
        .iter()
        .find(|(suffix, _)| path.ends_with(*suffix))
        .map_or(PLAIN_TEXT, |&(_, tag)| tag)
}
