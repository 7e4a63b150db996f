//! CLI tests

use super::*;
use clap::CommandFactory;

#[test]
fn test_cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn test_route_args_parse() {
    let cli = Cli::try_parse_from([
        "modelmux",
        "route",
        "text-generation",
        "hello",
        "--prefer",
        "anthropic",
        "--max-latency",
        "250",
        "--evaluate",
        "--format",
        "json",
    ])
    .unwrap();

    assert_eq!(cli.format, OutputFormat::Json);
    match cli.command {
        Commands::Route {
            task_type,
            input,
            evaluate,
            selection,
            ..
        } => {
            assert_eq!(task_type, "text-generation");
            assert_eq!(input.as_deref(), Some("hello"));
            assert!(evaluate);
            let options = selection.to_options();
            assert_eq!(options.preferred_provider, Some(Provider::Anthropic));
            assert_eq!(options.max_latency_ms, Some(250.0));
            assert!(!options.cost_sensitive);
        }
        _ => panic!("expected route command"),
    }
}

#[test]
fn test_unknown_provider_rejected() {
    assert!(Cli::try_parse_from(["modelmux", "registry", "enable", "acme"]).is_err());
}

#[test]
fn test_feedback_parses_model_identifier() {
    let cli = Cli::try_parse_from([
        "modelmux",
        "feedback",
        "openai:gpt-4",
        "text-generation",
        "--rating",
        "0.8",
    ])
    .unwrap();
    match cli.command {
        Commands::Feedback { model, rating, .. } => {
            assert_eq!(model, ModelIdentifier::new(Provider::OpenAi, "gpt-4"));
            assert_eq!(rating, Some(0.8));
        }
        _ => panic!("expected feedback command"),
    }
}

#[test]
fn test_build_payload_by_task_type() {
    let text = build_payload(
        &TaskType::text_generation(),
        Some("hi".to_string()),
        None,
        Some(32),
        None,
        None,
        false,
    )
    .unwrap();
    assert!(matches!(
        text,
        TaskPayload::Text {
            max_length: Some(32),
            ..
        }
    ));

    let embedding = build_payload(
        &TaskType::embedding(),
        Some("hi".to_string()),
        None,
        None,
        None,
        None,
        true,
    )
    .unwrap();
    assert!(matches!(embedding, TaskPayload::Embedding { normalize: true, .. }));

    assert!(
        build_payload(&TaskType::text_generation(), None, None, None, None, None, false).is_err()
    );
}

#[test]
fn test_build_payload_reads_image_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pixel.png");
    std::fs::write(&path, b"\x89PNG\r\n\x1a\n").unwrap();

    let payload = build_payload(
        &TaskType::image_analysis(),
        Some("count the cats".to_string()),
        Some(path),
        None,
        None,
        None,
        false,
    )
    .unwrap();
    match payload {
        TaskPayload::Image { data, task } => {
            assert_eq!(data.len(), 8);
            assert_eq!(task.as_deref(), Some("count the cats"));
        }
        other => panic!("unexpected payload: {:?}", other),
    }
}
