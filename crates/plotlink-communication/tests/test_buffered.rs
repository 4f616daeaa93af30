use plotlink_communication::{Command, FlowConfig, FlowController, LinkWriter};
use plotlink_core::{ChannelEvent, CommandError, EventDispatcher};
use proptest::prelude::*;
use std::io;
use std::time::Duration;
use tokio::sync::oneshot;

type Outcome = oneshot::Receiver<Result<usize, CommandError>>;

#[derive(Default)]
struct RecordingWriter {
    sent: Vec<String>,
    broken: bool,
}

impl LinkWriter for RecordingWriter {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        if self.broken {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        }
        self.sent.push(String::from_utf8_lossy(data).to_string());
        Ok(())
    }

    fn port_name(&self) -> &str {
        "mock"
    }
}

fn commands(lines: &[&str]) -> Vec<Command> {
    lines
        .iter()
        .map(|line| Command::parse(line).unwrap().unwrap())
        .collect()
}

fn controller(window_size: usize) -> FlowController {
    FlowController::new(
        FlowConfig {
            window_size,
            command_timeout: Duration::from_secs(10),
        },
        EventDispatcher::default(),
    )
}

fn submit(flow: &mut FlowController, lines: &[&str]) -> Outcome {
    let (tx, rx) = oneshot::channel();
    flow.enqueue(commands(lines), tx);
    rx
}

#[test]
fn test_window_limits_transmission() {
    let mut flow = controller(4);
    let mut writer = RecordingWriter::default();
    let _rx = submit(&mut flow, &["G0 X1", "G0 X2", "G0 X3", "G0 X4", "G0 X5", "G0 X6"]);

    assert_eq!(flow.drain(&mut writer).unwrap(), 4);
    assert_eq!(flow.active_commands_count(), 4);
    assert_eq!(flow.queued_commands_count(), 2);
    assert_eq!(flow.window_available(), 0);
    assert_eq!(writer.sent, vec!["G0 X1\n", "G0 X2\n", "G0 X3\n", "G0 X4\n"]);

    // Full window sends nothing more
    assert_eq!(flow.drain(&mut writer).unwrap(), 0);

    assert!(flow.handle_acknowledgment());
    assert_eq!(flow.drain(&mut writer).unwrap(), 1);
    assert_eq!(writer.sent.last().unwrap(), "G0 X5\n");
}

#[test]
fn test_submission_resolves_after_all_acks() {
    let mut flow = controller(4);
    let mut writer = RecordingWriter::default();
    let mut rx = submit(&mut flow, &["G28", "G1 X10"]);
    flow.drain(&mut writer).unwrap();

    assert!(flow.handle_acknowledgment());
    assert!(rx.try_recv().is_err());

    assert!(flow.handle_acknowledgment());
    assert_eq!(rx.try_recv().unwrap(), Ok(2));
    assert!(!flow.is_busy());
}

#[test]
fn test_error_reports_first_failure() {
    let mut flow = controller(4);
    let mut writer = RecordingWriter::default();
    let mut rx = submit(&mut flow, &["G1 X10", "G1 Xfoo", "G1 X20"]);
    flow.drain(&mut writer).unwrap();

    flow.handle_acknowledgment();
    flow.handle_error("error:2");
    flow.handle_acknowledgment();

    match rx.try_recv().unwrap() {
        Err(CommandError::Protocol { command, response }) => {
            assert_eq!(command, "G1 Xfoo");
            assert_eq!(response, "error:2");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[test]
fn test_reply_with_nothing_in_flight() {
    let mut flow = controller(4);
    assert!(!flow.handle_acknowledgment());
    assert!(!flow.handle_error("error:1"));
    assert!(!flow.is_busy());
}

#[test]
fn test_empty_submission_resolves_immediately() {
    let mut flow = controller(4);
    let (tx, mut rx) = oneshot::channel();
    assert!(flow.enqueue(Vec::new(), tx).is_none());
    assert_eq!(rx.try_recv().unwrap(), Ok(0));
}

#[test]
fn test_zero_window_is_raised_to_one() {
    let mut flow = controller(0);
    let mut writer = RecordingWriter::default();
    let _rx = submit(&mut flow, &["M3", "M5"]);

    assert_eq!(flow.drain(&mut writer).unwrap(), 1);
    assert_eq!(flow.window_available(), 0);
}

#[test]
fn test_clear_fails_queued_and_in_flight() {
    let mut flow = controller(2);
    let mut writer = RecordingWriter::default();
    let mut first = submit(&mut flow, &["G0 X1", "G0 X2"]);
    let mut second = submit(&mut flow, &["G0 X3"]);
    flow.drain(&mut writer).unwrap();

    assert_eq!(flow.clear_queue(), 3);
    assert!(!flow.is_busy());
    assert_eq!(
        first.try_recv().unwrap(),
        Err(CommandError::Cleared {
            command: "G0 X1".to_string()
        })
    );
    assert_eq!(
        second.try_recv().unwrap(),
        Err(CommandError::Cleared {
            command: "G0 X3".to_string()
        })
    );

    // A late reply for a cleared command is not matched to anything
    assert!(!flow.handle_acknowledgment());
}

#[test]
fn test_link_fault_fails_everything() {
    let events = EventDispatcher::new(16);
    let mut observer = events.subscribe();
    let mut flow = FlowController::new(FlowConfig::default(), events);
    let mut writer = RecordingWriter::default();
    let mut rx = submit(&mut flow, &["G0 X1", "G0 X2"]);
    flow.drain(&mut writer).unwrap();

    assert_eq!(flow.fail_link("port closed"), 2);
    assert_eq!(
        rx.try_recv().unwrap(),
        Err(CommandError::LinkFault {
            command: "G0 X1".to_string(),
            reason: "port closed".to_string()
        })
    );

    let mut failed = 0;
    while let Ok(event) = observer.try_recv() {
        if matches!(event, ChannelEvent::CommandFailed { .. }) {
            failed += 1;
        }
    }
    assert_eq!(failed, 2);
}

#[test]
fn test_write_failure_requeues_command() {
    let mut flow = controller(4);
    let mut writer = RecordingWriter {
        broken: true,
        ..Default::default()
    };
    let _rx = submit(&mut flow, &["G28"]);

    assert!(flow.drain(&mut writer).is_err());
    assert_eq!(flow.queued_commands_count(), 1);
    assert_eq!(flow.active_commands_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_expired_command_frees_its_slot() {
    let mut flow = controller(1);
    let mut writer = RecordingWriter::default();
    let mut slow = submit(&mut flow, &["G4 P20"]);
    let mut next = submit(&mut flow, &["M5"]);
    flow.drain(&mut writer).unwrap();

    let deadline = flow.next_deadline().unwrap();
    assert_eq!(flow.expire(deadline - Duration::from_millis(1)), 0);

    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(flow.expire(tokio::time::Instant::now()), 1);
    assert_eq!(
        slow.try_recv().unwrap(),
        Err(CommandError::Timeout {
            command: "G4 P20".to_string(),
            timeout_ms: 10_000
        })
    );

    assert_eq!(flow.drain(&mut writer).unwrap(), 1);
    assert_eq!(writer.sent, vec!["G4 P20\n", "M5\n"]);
    assert!(flow.handle_acknowledgment());
    assert_eq!(next.try_recv().unwrap(), Ok(1));
}

#[derive(Debug, Clone)]
enum Reply {
    Ack,
    Error,
}

fn reply_strategy() -> impl Strategy<Value = Reply> {
    prop_oneof![3 => Just(Reply::Ack), 1 => Just(Reply::Error)]
}

proptest! {
    #[test]
    fn prop_window_bound_and_order(
        window in 1usize..6,
        count in 1usize..30,
        replies in prop::collection::vec(reply_strategy(), 0..40),
    ) {
        let mut flow = controller(window);
        let mut writer = RecordingWriter::default();
        let lines: Vec<String> = (0..count).map(|i| format!("G1 X{}", i)).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let mut rx = submit(&mut flow, &refs);

        flow.drain(&mut writer).unwrap();
        prop_assert!(flow.active_commands_count() <= window);

        for reply in replies {
            match reply {
                Reply::Ack => flow.handle_acknowledgment(),
                Reply::Error => flow.handle_error("error:1"),
            };
            flow.drain(&mut writer).unwrap();
            prop_assert!(flow.active_commands_count() <= window);
        }

        // Transmission order always matches submission order
        let expected: Vec<String> = lines
            .iter()
            .take(writer.sent.len())
            .map(|l| format!("{}\n", l))
            .collect();
        prop_assert_eq!(&writer.sent, &expected);

        while flow.handle_acknowledgment() {
            flow.drain(&mut writer).unwrap();
        }
        prop_assert!(!flow.is_busy());
        prop_assert_eq!(writer.sent.len(), count);
        prop_assert!(rx.try_recv().is_ok());
    }
}
