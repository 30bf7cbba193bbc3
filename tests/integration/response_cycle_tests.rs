//! Integration tests for response cycles driven through the agent.

use interpreter_relay::models::chunk::{Chunk, ChunkType, Frame, Role};
use interpreter_relay::models::cycle::CycleStatus;

use super::test_helpers::{
    assistant, drain, quiet_settings, test_agent, texts, user_turn, BlockingGenerator,
    ScriptedGenerator, Step,
};

fn confirmation() -> Chunk {
    Chunk::new(Role::Computer)
        .with_type(ChunkType::Confirmation)
        .with_format("execution")
        .with_content("{\"code\": \"print(1)\"}")
}

fn code() -> Chunk {
    Chunk::new(Role::Computer)
        .with_type(ChunkType::Console)
        .with_format("output")
        .with_content("1")
}

#[tokio::test]
async fn end_marker_runs_cycle_and_emits_sentinel() {
    let generator = ScriptedGenerator::replying(vec![assistant("ok")]);
    let (mut agent, output) = test_agent(generator.clone(), quiet_settings());

    agent.input(user_turn("hi")).await.expect("input");
    assert_eq!(agent.wait().await, Some(CycleStatus::Completed));

    let frames = drain(&output);
    assert_eq!(
        frames,
        vec![Frame::Chunk(assistant("ok")), Frame::Chunk(Chunk::complete())]
    );

    let messages = agent.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].text(), Some("hi"));
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].text(), Some("ok"));

    let calls = generator.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].history.len(), 1);
    assert!(!calls[0].run_code);
}

#[tokio::test]
async fn chunks_are_delivered_in_generation_order() {
    let generator = ScriptedGenerator::replying(vec![
        assistant("a"),
        assistant("b"),
        assistant("c"),
    ]);
    let (mut agent, output) = test_agent(generator, quiet_settings());

    agent.input(user_turn("go on")).await.expect("input");
    agent.wait().await;

    assert_eq!(texts(&drain(&output)), vec!["a", "b", "c", "complete"]);
    assert_eq!(agent.messages()[1].text(), Some("abc"));
}

#[tokio::test]
async fn confirmation_without_run_code_stops_the_cycle() {
    let generator = ScriptedGenerator::replying(vec![
        assistant("running it"),
        confirmation(),
        code(),
    ]);
    let (mut agent, output) = test_agent(generator, quiet_settings());

    agent.input(user_turn("run it")).await.expect("input");
    assert_eq!(agent.wait().await, Some(CycleStatus::Denied));

    let frames = drain(&output);
    assert_eq!(texts(&frames), vec!["running it", "complete"]);
    assert!(!frames.iter().any(|frame| matches!(
        frame,
        Frame::Chunk(chunk) if chunk.kind == Some(ChunkType::Console)
    )));
}

#[tokio::test]
async fn auto_run_approves_one_confirmation() {
    let generator = ScriptedGenerator::replying(vec![
        confirmation(),
        code(),
        confirmation(),
        code(),
    ]);
    let settings = interpreter_relay::settings::Settings {
        auto_run: true,
        ..quiet_settings()
    };
    let (mut agent, output) = test_agent(generator, settings);

    agent.input(user_turn("run twice")).await.expect("input");
    assert_eq!(agent.wait().await, Some(CycleStatus::Denied));

    assert_eq!(texts(&drain(&output)), vec!["1", "complete"]);
}

#[tokio::test]
async fn generator_error_emits_error_then_sentinel() {
    let generator = ScriptedGenerator::new(vec![
        Step::Emit(assistant("partial")),
        Step::Fail("model unavailable".into()),
        Step::Emit(assistant("never")),
    ]);
    let (mut agent, output) = test_agent(generator, quiet_settings());

    agent.input(user_turn("hi")).await.expect("input");
    assert_eq!(agent.wait().await, Some(CycleStatus::Failed));

    let frames = drain(&output);
    assert_eq!(
        frames,
        vec![
            Frame::Chunk(assistant("partial")),
            Frame::Chunk(Chunk::error("generation: model unavailable")),
            Frame::Chunk(Chunk::complete()),
        ]
    );
}

#[tokio::test]
async fn generator_panic_is_reported_like_an_error() {
    let generator = ScriptedGenerator::new(vec![Step::Panic("kaboom".into())]);
    let (mut agent, output) = test_agent(generator, quiet_settings());

    agent.input(user_turn("hi")).await.expect("input");
    assert_eq!(agent.wait().await, Some(CycleStatus::Failed));

    let frames = drain(&output);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0], Frame::Chunk(Chunk::error("generation: kaboom")));
    assert_eq!(frames[1], Frame::Chunk(Chunk::complete()));
}

#[tokio::test]
async fn new_start_cancels_running_cycle_quietly() {
    let generator = BlockingGenerator::new();
    let (mut agent, output) = test_agent(generator.clone(), quiet_settings());

    agent.input(user_turn("first question")).await.expect("input");
    assert!(agent.is_responding());

    let interrupt = Frame::Chunk(
        Chunk::new(Role::User)
            .with_type(ChunkType::Message)
            .with_content("actually")
            .starting(),
    );
    agent.input(interrupt).await.expect("input");

    assert!(!agent.is_responding());
    assert_eq!(
        agent.cycle().map(|cycle| cycle.status),
        Some(CycleStatus::Cancelled)
    );

    let emitted = texts(&drain(&output));
    assert!(!emitted.iter().any(|text| text == "late"));
    assert!(!emitted.iter().any(|text| text == "complete"));

    let last = agent.messages().pop().expect("message");
    assert_eq!(last.role, Role::User);
    assert_eq!(last.text(), Some("actually"));
}

#[tokio::test]
async fn bare_content_on_empty_log_is_rejected_without_cycle() {
    let generator = ScriptedGenerator::replying(vec![assistant("ok")]);
    let (mut agent, output) = test_agent(generator.clone(), quiet_settings());

    let bare = Frame::Chunk(
        Chunk::new(Role::User)
            .with_type(ChunkType::Message)
            .with_content("hi")
            .ending(),
    );
    let err = agent.input(bare).await.expect_err("protocol error");

    assert!(matches!(err, interpreter_relay::AppError::Protocol(_)));
    assert!(agent.messages().is_empty());
    assert!(!agent.is_responding());
    assert!(drain(&output).is_empty());
    assert!(generator.calls().is_empty());
}
