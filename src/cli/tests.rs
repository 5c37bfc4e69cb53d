#[cfg(test)]
mod tests {
    use crate::cli::{Args, Command};
    use crate::config::{LLMProvider, SessionBackend};
    use crate::i18n::TargetLanguage;
    use clap::Parser;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    #[test]
    fn test_args_default_values() {
        let args = Args::try_parse_from(["devplan-rs", "build a todo app"]).unwrap();

        assert_eq!(args.prompt.as_deref(), Some("build a todo app"));
        assert!(args.output_path.is_none());
        assert!(args.resume.is_none());
        assert!(!args.list_sessions);
        assert!(!args.no_dynamic_search);
        assert!(!args.verbose);
    }

    #[test]
    fn test_command_dispatch() {
        let run = Args::try_parse_from(["devplan-rs", "  build a todo app "]).unwrap();
        assert_eq!(run.command().unwrap(), Command::Run("build a todo app".to_string()));

        let resume = Args::try_parse_from(["devplan-rs", "--resume", "abc-123"]).unwrap();
        assert_eq!(resume.command().unwrap(), Command::Resume("abc-123".to_string()));

        let list = Args::try_parse_from(["devplan-rs", "--list-sessions"]).unwrap();
        assert_eq!(list.command().unwrap(), Command::ListSessions);

        let delete = Args::try_parse_from(["devplan-rs", "--delete-session", "abc"]).unwrap();
        assert_eq!(delete.command().unwrap(), Command::DeleteSession("abc".to_string()));

        let empty = Args::try_parse_from(["devplan-rs"]).unwrap();
        assert!(empty.command().is_err());
    }

    #[test]
    fn test_conflicting_commands_are_rejected() {
        assert!(Args::try_parse_from(["devplan-rs", "build", "--resume", "abc"]).is_err());
        assert!(Args::try_parse_from(["devplan-rs", "--list-sessions", "--resume", "abc"]).is_err());
    }

    #[test]
    fn test_into_config_overrides() {
        let args = Args::try_parse_from([
            "devplan-rs",
            "build a todo app",
            "-o", "/tmp/plans",
            "--session-dir", "/tmp/sessions",
            "--max-rounds", "12",
            "--max-revisions", "3",
            "--planner-provider", "openai",
            "--planner-model", "gpt-4o",
            "--planner-api-key", "pk",
            "--writer-provider", "ollama",
            "--writer-model", "llama3",
            "--writer-base-url", "http://gpu:11434",
            "--serper-api-key", "sk",
            "--target-language", "zh",
            "--no-dynamic-search",
            "-v",
        ])
        .unwrap();
        let config = args.into_config().unwrap();

        assert_eq!(config.output_path, PathBuf::from("/tmp/plans"));
        assert_eq!(config.session.dir, PathBuf::from("/tmp/sessions"));
        assert_eq!(config.workflow.max_rounds, 12);
        assert_eq!(config.workflow.max_revisions_per_document, 3);
        assert!(!config.workflow.dynamic_search);
        assert_eq!(config.planner.provider, LLMProvider::OpenAI);
        assert_eq!(config.planner.model, "gpt-4o");
        assert_eq!(config.planner.api_key, "pk");
        assert_eq!(config.writer.provider, LLMProvider::Ollama);
        assert_eq!(config.writer.model, "llama3");
        assert_eq!(config.writer.api_base_url, "http://gpu:11434");
        assert_eq!(config.search.api_key, "sk");
        assert_eq!(config.target_language, TargetLanguage::Chinese);
        assert!(config.verbose);
    }

    #[test]
    fn test_unknown_provider_keeps_default() {
        let args = Args::try_parse_from([
            "devplan-rs",
            "x",
            "--planner-provider", "mistral",
            "--target-language", "klingon",
        ])
        .unwrap();
        let config = args.into_config().unwrap();
        assert_eq!(config.planner.provider, LLMProvider::DeepSeek);
        assert_eq!(config.target_language, TargetLanguage::English);
    }

    #[test]
    fn test_explicit_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "output_path = \"/srv/plans\"\n\n[workflow]\nmax_rounds = 9").unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let args = Args::try_parse_from(["devplan-rs", "x", "-c", &path, "--max-rounds", "20"]).unwrap();
        let config = args.into_config().unwrap();
        assert_eq!(config.output_path, PathBuf::from("/srv/plans"));
        // CLI 优先于配置文件
        assert_eq!(config.workflow.max_rounds, 20);
    }

    #[test]
    fn test_verbose_from_config_file_is_kept() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "verbose = true").unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let args = Args::try_parse_from(["devplan-rs", "x", "-c", &path]).unwrap();
        assert!(!args.verbose);
        let config = args.into_config().unwrap();
        assert!(config.verbose);
        assert_eq!(config.log_level(), "debug");
    }

    #[test]
    fn test_session_backend_override() {
        let args = Args::try_parse_from(["devplan-rs", "x", "--session-backend", "memory"]).unwrap();
        assert_eq!(args.into_config().unwrap().session.backend, SessionBackend::Memory);

        let args = Args::try_parse_from(["devplan-rs", "x", "--session-backend", "redis"]).unwrap();
        assert_eq!(args.into_config().unwrap().session.backend, SessionBackend::File);
    }

    #[test]
    fn test_missing_explicit_config_file_is_an_error() {
        let args = Args::try_parse_from(["devplan-rs", "x", "-c", "/definitely/missing/devplan.toml"]).unwrap();
        assert!(args.into_config().is_err());
    }
}
