//! End-to-end checks for stream and log capture.

use std::io::Write;

use fixture_core::{
    logging::LogCapture,
    scope::{with, Guard},
    streams::{CaptureStreams, MuteStreams},
};

#[test]
fn sinks_outlive_the_scope_and_streams_recover() -> anyhow::Result<()> {
    let guard = Guard::new(CaptureStreams::new())?;
    writeln!(std::io::stdout(), "captured line")?;
    writeln!(std::io::stderr(), "captured error")?;
    let (stdout, stderr) = guard.restore()?.unwrap();

    assert!(stdout.contains("captured line")?);
    assert!(stderr.contains("captured error")?);

    // The restored streams accept writes; a fresh capture proves the
    // descriptors are healthy and the old sinks stay frozen.
    with(CaptureStreams::new(), |_| {
        writeln!(std::io::stdout(), "later write").unwrap();
    })?;
    assert!(!stdout.contains("later write")?);
    Ok(())
}

#[test]
fn capture_separates_the_two_streams() -> anyhow::Result<()> {
    with(CaptureStreams::new(), |(stdout, stderr)| {
        writeln!(std::io::stdout(), "to stdout").unwrap();
        writeln!(std::io::stderr(), "to stderr").unwrap();

        assert!(stdout.contains("to stdout").unwrap());
        assert!(!stdout.contains("to stderr").unwrap());
        assert!(stderr.contains("to stderr").unwrap());
        assert!(!stderr.contains("to stdout").unwrap());
    })?;
    Ok(())
}

#[test]
fn mute_swallows_output_without_breaking_the_streams() -> anyhow::Result<()> {
    with(MuteStreams::new(), |_| {
        writeln!(std::io::stdout(), "shouted into the void").unwrap();
    })?;

    with(CaptureStreams::new(), |(stdout, _)| {
        writeln!(std::io::stdout(), "back on the record").unwrap();
        assert!(stdout.contains("back on the record").unwrap());
        assert!(!stdout.contains("shouted into the void").unwrap());
    })?;
    Ok(())
}

#[test]
fn log_capture_collects_only_scope_events() -> anyhow::Result<()> {
    tracing::info!("before the scope");

    let logs = with(LogCapture::new(), |logs| {
        tracing::warn!(queue = "default", "consumer lagging");
        logs.clone()
    })?;

    tracing::info!("after the scope");

    assert!(logs.contains("consumer lagging"));
    assert!(logs.contains("queue"));
    assert!(!logs.contains("before the scope"));
    assert!(!logs.contains("after the scope"));
    Ok(())
}

#[test]
fn stream_and_log_capture_stack() -> anyhow::Result<()> {
    with(CaptureStreams::new(), |(stdout, _)| {
        with(LogCapture::new(), |logs| {
            tracing::error!("structured event");
            writeln!(std::io::stdout(), "raw write").unwrap();

            assert!(logs.contains("structured event"));
            assert!(stdout.contains("raw write").unwrap());
            assert!(!logs.contains("raw write"));
        })
        .unwrap();
    })?;
    Ok(())
}
