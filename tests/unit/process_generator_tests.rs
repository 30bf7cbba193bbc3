//! Unit tests for the NDJSON process generator.

#![cfg(unix)]

use interpreter_relay::driver::process::ProcessGenerator;
use interpreter_relay::driver::ResponseGenerator;
use interpreter_relay::models::chunk::{ChunkType, Content, Role};
use interpreter_relay::models::message::Message;
use interpreter_relay::AppError;
use tokio_util::sync::CancellationToken;

fn shell(script: &str) -> ProcessGenerator {
    ProcessGenerator::new("sh", vec!["-c".into(), script.into()])
}

fn history() -> Vec<Message> {
    vec![Message {
        role: Role::User,
        kind: Some(ChunkType::Message),
        format: None,
        content: Some(Content::Text("hi".into())),
    }]
}

#[test]
fn streams_chunks_from_stdout() {
    let generator = shell(
        r#"cat > /dev/null
printf '%s\n' '{"role":"assistant","type":"message","start":true}'
printf '\n'
printf '%s\n' '{"role":"assistant","type":"message","content":"ok"}'"#,
    );

    let chunks: Vec<_> = generator
        .respond(&history(), false, &CancellationToken::new())
        .expect("spawn")
        .collect::<Result<_, _>>()
        .expect("chunks");

    assert_eq!(chunks.len(), 2);
    assert!(chunks[0].start);
    assert_eq!(
        chunks[1].content.as_ref().and_then(Content::as_text),
        Some("ok")
    );
}

#[test]
fn request_is_written_to_stdin() {
    let generator = shell(
        r#"read -r line
case "$line" in
  *'"content":"hi"'*'"run_code":true'*) reply=seen ;;
  *) reply=missing ;;
esac
printf '{"role":"assistant","type":"message","content":"%s"}\n' "$reply""#,
    );

    let chunks: Vec<_> = generator
        .respond(&history(), true, &CancellationToken::new())
        .expect("spawn")
        .collect::<Result<_, _>>()
        .expect("chunks");

    assert_eq!(
        chunks[0].content.as_ref().and_then(Content::as_text),
        Some("seen")
    );
}

#[test]
fn invalid_line_is_a_generation_error() {
    let generator = shell("cat > /dev/null; echo 'not a chunk'");
    let mut stream = generator
        .respond(&history(), false, &CancellationToken::new())
        .expect("spawn");

    let item = stream.next().expect("one item");
    assert!(matches!(item, Err(AppError::Generation(_))));
}

#[test]
fn nonzero_exit_is_a_generation_error() {
    let generator = shell("cat > /dev/null; exit 3");
    let mut stream = generator
        .respond(&history(), false, &CancellationToken::new())
        .expect("spawn");

    assert!(matches!(stream.next(), Some(Err(AppError::Generation(_)))));
    assert!(stream.next().is_none());
}

#[test]
fn missing_program_fails_to_spawn() {
    let generator = ProcessGenerator::new("/nonexistent/relay-generator", Vec::new());
    let result = generator.respond(&history(), false, &CancellationToken::new());
    assert!(matches!(result, Err(AppError::Generation(_))));
}

#[test]
fn cancelled_stream_yields_nothing() {
    let generator = shell(
        r#"cat > /dev/null; printf '%s\n' '{"role":"assistant","content":"x"}'"#,
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut stream = generator
        .respond(&history(), false, &cancel)
        .expect("spawn");
    assert!(stream.next().is_none());
}

#[test]
fn cancellation_mid_stream_ends_quietly_and_promptly() {
    use std::time::{Duration, Instant};

    let generator = shell(
        r#"cat > /dev/null
printf '%s\n' '{"role":"assistant","content":"first"}'
exec sleep 30"#,
    );
    let cancel = CancellationToken::new();
    let mut stream = generator
        .respond(&history(), false, &cancel)
        .expect("spawn");

    let first = stream.next().expect("first item").expect("chunk");
    assert_eq!(first.content.as_ref().and_then(Content::as_text), Some("first"));

    let began = Instant::now();
    let canceller = {
        let cancel = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        })
    };
    // Blocked reading until the cancellation kills the child.
    assert!(stream.next().is_none());
    assert!(began.elapsed() < Duration::from_secs(5));
    assert!(stream.next().is_none());
    canceller.join().expect("canceller");
}
