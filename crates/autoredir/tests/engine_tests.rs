//! Engine Integration Tests
//!
//! Drives the auto-redirection engine over the export action with a scripted
//! command runner and a paused clock.
//!
//! # Test Scenarios
//! - Bursts of changes collapse into one action pass
//! - Idempotent enable ("already bound")
//! - Filtering and the empty rule set
//! - Shutdown of the run loop
//! - Cancel-all continues past failures
//!
//! Run with: `cargo test -p autoredir --test engine_tests`

use autoredir::{
    AutoRedirEngine, DispatchReport, EngineSettings, ExportAction, TickOutcome, Utilities,
};
use common::test_utils::ScriptedRunner;
use common::{CommandOutput, RuleList, parse_rules};
use std::time::Duration;

const LSUSB: &str = "\
Bus 001 Device 002: ID 046d:c52b Logitech, Inc. Unifying Receiver
Bus 001 Device 003: ID 0781:5581 SanDisk Corp. Ultra";

const LOCAL_LISTING: &str = "\
 - busid 1-1 (046d:c52b)
   Logitech, Inc. : Unifying Receiver (046d:c52b)

 - busid 1-2 (0781:5581)
   SanDisk Corp. : Ultra (0781:5581)
";

fn scripted() -> ScriptedRunner {
    let runner = ScriptedRunner::new();
    runner
        .reply("lsusb", CommandOutput::ok(LSUSB))
        .reply("usbip list -l", CommandOutput::ok(LOCAL_LISTING))
        .reply(
            "lsusb -v -d 046d:c52b",
            CommandOutput::ok("      bInterfaceClass         3 Human Interface Device"),
        )
        .reply(
            "lsusb -v -d 0781:5581",
            CommandOutput::ok("      bInterfaceClass         8 Mass Storage"),
        )
        .reply("usbip bind -b 1-1", CommandOutput::ok("bind device on busid 1-1: complete"))
        .reply("usbip bind -b 1-2", CommandOutput::ok("bind device on busid 1-2: complete"));
    runner
}

fn engine(
    runner: &ScriptedRunner,
    rules: RuleList,
) -> AutoRedirEngine<ExportAction<ScriptedRunner>> {
    let action = ExportAction::new(runner.clone(), Utilities::default());
    AutoRedirEngine::new(
        action,
        rules,
        EngineSettings {
            poll_interval: Duration::from_secs(1),
            settle_delay: Duration::from_secs(2),
        },
    )
}

async fn advance(secs: u64) {
    tokio::time::advance(Duration::from_secs(secs)).await;
}

mod debounce {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_into_one_pass() {
        let runner = scripted();
        // Fingerprint keeps changing for three ticks, then holds
        let plugged = |line: &str| CommandOutput::ok(format!("{}\n{}", LSUSB, line));
        runner
            .replace("lsusb", plugged("Bus 001 Device 004: ID 1111:0001"))
            .reply("lsusb", plugged("Bus 001 Device 005: ID 1111:0002"))
            .reply("lsusb", CommandOutput::ok(LSUSB));

        let mut engine = engine(&runner, parse_rules(["+ *"]));

        assert_eq!(engine.tick().await, TickOutcome::Settling);
        advance(1).await;
        assert_eq!(engine.tick().await, TickOutcome::Settling);
        advance(1).await;
        assert_eq!(engine.tick().await, TickOutcome::Settling);
        advance(1).await;
        assert_eq!(engine.tick().await, TickOutcome::Settling);
        assert_eq!(runner.count("usbip list -l"), 0);

        advance(1).await;
        assert!(matches!(engine.tick().await, TickOutcome::Dispatched(_)));
        assert_eq!(runner.count("usbip list -l"), 1);

        advance(1).await;
        assert_eq!(engine.tick().await, TickOutcome::Quiet);
        assert_eq!(runner.count("usbip list -l"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_happens_before_settle_delay() {
        let runner = scripted();
        let mut engine = engine(&runner, parse_rules(["+ *"]));

        assert_eq!(engine.tick().await, TickOutcome::Settling);
        advance(1).await;
        assert_eq!(engine.tick().await, TickOutcome::Settling);
        assert_eq!(runner.count("usbip bind"), 0);

        advance(1).await;
        let outcome = engine.tick().await;
        assert_eq!(
            outcome,
            TickOutcome::Dispatched(DispatchReport {
                attempted: 2,
                succeeded: 2,
                failed: 0,
            })
        );
    }
}

mod dispatch {
    use super::*;

    async fn settle(engine: &mut AutoRedirEngine<ExportAction<ScriptedRunner>>) -> TickOutcome {
        engine.tick().await;
        advance(2).await;
        engine.tick().await
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_bound_counts_as_success() {
        let runner = scripted();
        runner.replace(
            "usbip bind -b 1-1",
            CommandOutput::failed(
                1,
                "usbip: error: device on busid 1-1 is already bound to usbip-host",
            ),
        );
        let mut engine = engine(&runner, parse_rules(["+ *"]));

        let TickOutcome::Dispatched(report) = settle(&mut engine).await else {
            panic!("expected an action pass");
        };
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_abort_pass() {
        let runner = scripted();
        runner.replace("usbip bind -b 1-1", CommandOutput::failed(1, "usbip: error: bind failed"));
        let mut engine = engine(&runner, parse_rules(["+ *"]));

        let TickOutcome::Dispatched(report) = settle(&mut engine).await else {
            panic!("expected an action pass");
        };
        assert_eq!(report.attempted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(runner.count("usbip bind -b 1-2"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_allowed_devices_bound() {
        let runner = scripted();
        let mut engine = engine(&runner, parse_rules(["+ hid", "- *"]));

        settle(&mut engine).await;
        assert_eq!(runner.count("usbip bind -b 1-1"), 1);
        assert_eq!(runner.count("usbip bind -b 1-2"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_rules_disable_action() {
        let runner = scripted();
        let mut engine = engine(&runner, RuleList::new());

        let outcome = settle(&mut engine).await;
        assert_eq!(outcome, TickOutcome::Dispatched(DispatchReport::default()));
        assert_eq!(runner.count("usbip bind"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_failure_retries_after_settle() {
        let runner = scripted();
        runner
            .replace("usbip list -l", CommandOutput::failed(2, "usbip: error: open vhci_driver"))
            .reply("usbip list -l", CommandOutput::ok(LOCAL_LISTING));
        let mut engine = engine(&runner, parse_rules(["+ *"]));

        // Failed listing re-arms the settle timer instead of dropping the change
        assert_eq!(settle(&mut engine).await, TickOutcome::Settling);
        assert_eq!(runner.count("usbip list -l"), 1);
        assert_eq!(runner.count("usbip bind"), 0);

        advance(1).await;
        assert_eq!(engine.tick().await, TickOutcome::Settling);

        advance(1).await;
        assert!(matches!(engine.tick().await, TickOutcome::Dispatched(_)));
        assert_eq!(runner.count("usbip list -l"), 2);
        assert_eq!(runner.count("usbip bind -b 1-1"), 1);
        assert_eq!(runner.count("usbip bind -b 1-2"), 1);
    }

    #[tokio::test]
    async fn test_cancel_all_continues_past_failures() {
        let runner = scripted();
        runner
            .reply("usbip unbind -b 1-1", CommandOutput::failed(1, "usbip: error: not bound"))
            .reply("usbip unbind -b 1-2", CommandOutput::ok("unbind device on busid 1-2: complete"));
        let mut engine = engine(&runner, RuleList::new());

        let report = engine.cancel_all().await.unwrap();
        assert_eq!(
            report,
            DispatchReport {
                attempted: 2,
                succeeded: 1,
                failed: 1,
            }
        );
    }
}

mod run_loop {
    use super::*;
    use tokio::sync::watch;

    #[tokio::test(start_paused = true)]
    async fn test_run_until_shutdown() {
        let runner = scripted();
        let mut engine = engine(&runner, parse_rules(["+ *"]));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            engine.run(rx).await;
        });

        tokio::time::sleep(Duration::from_millis(5500)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(runner.count("usbip bind -b 1-1"), 1);
        assert!(runner.count("lsusb") >= 5);

        // No ticks after shutdown
        let calls = runner.calls().len();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(runner.calls().len(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sender_stops_loop() {
        let runner = scripted();
        let mut engine = engine(&runner, parse_rules(["+ *"]));
        let (tx, rx) = watch::channel(false);
        drop(tx);

        common::test_utils::with_timeout(Duration::from_secs(10), engine.run(rx))
            .await
            .unwrap();
    }
}
