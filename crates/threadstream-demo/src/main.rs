//! Replays a scripted generation step through a `DeltaWriter` while a reader
//! polls the thread and prints the materialized turns.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use threadstream_core::{
    Content, Message, MessageDoc, MessageStatus, NewStream, Part, Position, Role, StreamMetadata,
    StreamStatus, ThreadId, UiMessage, UiPart, apply_deltas, init_observability,
};
use threadstream_writer::{
    DeltaWriter, FeedOptions, FeedState, MemoryStore, StreamingOptions, ThreadFeed, config,
};
use tokio::sync::watch;

type DemoResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser, Debug)]
#[command(about = "Stream a scripted assistant reply and watch it materialize")]
struct Args {
    /// Thread to write into.
    #[arg(long, default_value = "demo-thread")]
    thread: String,
    /// Minimum interval between chunk writes; defaults to THREADSTREAM_THROTTLE_MS or 250.
    #[arg(long)]
    throttle_ms: Option<u64>,
    /// Delay between emitted parts.
    #[arg(long, default_value_t = 40)]
    part_delay_ms: u64,
    /// Reader poll interval.
    #[arg(long, default_value_t = 100)]
    poll_ms: u64,
    /// Cancel the generation after this many parts.
    #[arg(long)]
    abort_after: Option<usize>,
    /// Print the final turns as JSON.
    #[arg(long)]
    json: bool,
}

fn script() -> Vec<Part> {
    let mut parts: Vec<Part> = ["The user ", "wants current ", "weather."]
        .into_iter()
        .map(Part::reasoning_delta)
        .collect();
    parts.extend([
        Part::text_delta("Let me "),
        Part::text_delta("check."),
        Part::ToolCallStart { id: "call-1".into(), name: "weather".into() },
        Part::ToolCallDelta { id: "call-1".into(), delta: "{\"city\":".into() },
        Part::ToolCallDelta { id: "call-1".into(), delta: "\"Oslo\"}".into() },
        Part::ToolCall {
            id: "call-1".into(),
            name: "weather".into(),
            input: json!({"city": "Oslo"}),
        },
        Part::ToolResult {
            id: "call-1".into(),
            name: "weather".into(),
            output: json!({"temp_c": 3, "sky": "overcast"}),
            is_error: false,
        },
    ]);
    parts.extend(
        ["It is ", "3°C and ", "overcast ", "in Oslo."]
            .into_iter()
            .map(Part::text_delta),
    );
    parts
}

/// Folds the finished stream and commits its messages as finalized records.
async fn commit(store: &MemoryStore, writer: &DeltaWriter) -> DemoResult {
    let Some(stream_id) = writer.stream_id() else {
        return Ok(());
    };
    let stream = store
        .stream(&stream_id)
        .ok_or_else(|| format!("stream {stream_id} vanished"))?;
    let (state, _) = apply_deltas(&stream.thread_id, &stream, None, &store.deltas(&stream_id));
    let committed = state
        .messages
        .into_iter()
        .map(|mut message| {
            message.id = format!("msg-{}-{}", message.order, message.step_order);
            message.streaming = false;
            message.status = MessageStatus::Success;
            message
        })
        .collect();
    store.save_messages(committed)?;
    store.finalize(&stream_id)?;
    Ok(())
}

fn describe(turn: &UiMessage) -> String {
    let mut line = format!("[{:?} {:?}] {}", turn.role, turn.status, turn.text);
    for part in &turn.parts {
        match part {
            UiPart::Reasoning { text, .. } => line.push_str(&format!("\n    thinking: {text}")),
            UiPart::Tool(tool) => line.push_str(&format!(
                "\n    tool {}#{} {:?} input={} output={}",
                tool.tool_name,
                tool.tool_call_id,
                tool.state,
                tool.input.clone().unwrap_or_default(),
                tool.output.clone().unwrap_or_default(),
            )),
            _ => {}
        }
    }
    line
}

/// Emits the script part by part, then commits the result unless cancelled.
async fn generate(
    writer: DeltaWriter,
    store: MemoryStore,
    part_delay: Duration,
    abort_after: Option<usize>,
    abort_tx: watch::Sender<bool>,
) -> DemoResult {
    for (index, part) in script().into_iter().enumerate() {
        if abort_after == Some(index) {
            let _ = abort_tx.send(true);
            writer.closed().await;
            return Ok(());
        }
        if writer.is_aborted() {
            return Ok(());
        }
        writer.add_parts([part]);
        tokio::time::sleep(part_delay).await;
    }
    writer.finish().await?;
    commit(&store, &writer).await
}

#[tokio::main]
async fn main() -> DemoResult {
    config::init();
    init_observability();
    let args = Args::parse();

    let options = match args.throttle_ms {
        Some(millis) => StreamingOptions::default().throttle_ms(millis),
        None => StreamingOptions::from_env(),
    };
    let thread = ThreadId::new(args.thread.clone());
    let store = MemoryStore::new();
    store.save_messages(vec![MessageDoc::new(
        "msg-1-0",
        thread.clone(),
        Position::new(1, 0),
        MessageStatus::Success,
        Message::new(Role::User, Content::Text("What's the weather in Oslo?".into())),
        chrono::Utc::now(),
    )])?;

    let (abort_tx, abort_rx) = watch::channel(false);
    let writer = DeltaWriter::builder(
        Arc::new(store.clone()),
        NewStream::new(thread.clone(), 1, 1).metadata(StreamMetadata {
            model: Some("scripted".into()),
            agent_name: Some("demo".into()),
            ..StreamMetadata::default()
        }),
    )
    .options(options)
    .on_abort(|reason| tracing::warn!(reason, "generation stopped by store"))
    .abort_signal(abort_rx)
    .build();

    let generation = tokio::spawn(generate(
        writer,
        store.clone(),
        Duration::from_millis(args.part_delay_ms),
        args.abort_after,
        abort_tx,
    ));

    let feed = ThreadFeed::new(Arc::new(store.clone()), thread).options(
        FeedOptions::default().include_statuses([StreamStatus::Streaming, StreamStatus::Aborted]),
    );
    let mut state = FeedState::default();
    let mut ticker = tokio::time::interval(Duration::from_millis(args.poll_ms));
    let mut turns = Vec::new();
    loop {
        ticker.tick().await;
        let done = generation.is_finished();
        let snapshot = feed.sync(&state).await?;
        if snapshot.changed {
            turns = snapshot.turns();
            if !args.json {
                println!("--- {} turn(s)", turns.len());
                for turn in &turns {
                    println!("{}", describe(turn));
                }
            }
        }
        state = snapshot.state;
        if done {
            break;
        }
    }
    generation.await??;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&turns)?);
    }
    Ok(())
}
