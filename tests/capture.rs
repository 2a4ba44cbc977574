mod common;

use std::{fs, io::Cursor, time::Duration};

use common::{image_bytes, runner, shot_path, urls, FakeBrowser};
use shotter::{
    content_filter::Decision,
    devices::DeviceKind,
    run_log::RunLogEntry,
    types::{BatchRequest, CaptureOutcome, ImageFormat, ShotError},
};
use tempfile::tempdir;

fn entry(index: usize, url: &str) -> RunLogEntry {
    RunLogEntry {
        index,
        url: url.into(),
    }
}

#[test]
fn captures_every_device_for_every_non_empty_url() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let browser = FakeBrowser::new();
    let mut runner = runner(dir.path(), &browser);

    let results = runner.capture_many(
        &urls(&["http://a.test", "", "   ", "http://b.test"]),
        false,
        ImageFormat::Png,
        Duration::ZERO,
    )?;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].index, 1);
    assert_eq!(results[0].url, "http://a.test");
    assert_eq!(results[1].index, 2);
    assert_eq!(results[1].url, "http://b.test");
    for r in &results {
        assert_eq!(r.status, 200);
        assert_eq!(
            r.images.keys().copied().collect::<Vec<DeviceKind>>(),
            vec![DeviceKind::Desktop, DeviceKind::Tablet, DeviceKind::Mobile]
        );
    }
    assert_eq!(
        results[1].image(DeviceKind::Mobile),
        Some(image_bytes("http://b.test", DeviceKind::Mobile, ImageFormat::Png).as_slice())
    );

    for device in ["Desktop", "Tablet", "Mobile"] {
        assert!(shot_path(dir.path(), device, "00001.png").is_file());
        assert!(shot_path(dir.path(), device, "00002.png").is_file());
    }
    assert_eq!(
        fs::read(shot_path(dir.path(), "Tablet", "00001.png"))?,
        image_bytes("http://a.test", DeviceKind::Tablet, ImageFormat::Png)
    );

    let events = browser.events();
    assert_eq!(
        events.emulations,
        vec![
            DeviceKind::Desktop,
            DeviceKind::Tablet,
            DeviceKind::Mobile,
            DeviceKind::Desktop,
            DeviceKind::Tablet,
            DeviceKind::Mobile
        ]
    );
    assert!(events.snapshots.iter().all(|f| *f == ImageFormat::Png));
    assert_eq!(runner.run_log().latest_attempt(), Some(&entry(2, "http://b.test")));
    assert!(runner.run_log().failed().is_empty());
    assert!(runner.run_log().http_errors().is_empty());
    Ok(())
}

#[test]
fn duplicate_urls_are_captured_twice() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let browser = FakeBrowser::new();
    let mut runner = runner(dir.path(), &browser);

    let results = runner.capture_many(
        &urls(&["http://a.test", "http://a.test"]),
        false,
        ImageFormat::Jpeg,
        Duration::ZERO,
    )?;

    assert_eq!(results.len(), 2);
    assert!(shot_path(dir.path(), "Desktop", "00001.jpeg").is_file());
    assert!(shot_path(dir.path(), "Desktop", "00002.jpeg").is_file());
    assert_eq!(browser.events().navigations.len(), 2);
    Ok(())
}

#[test]
fn navigation_failure_does_not_stop_the_batch() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let browser = FakeBrowser::new();
    browser
        .behaviour()
        .fail_navigation
        .insert("http://b.test".into());
    let mut runner = runner(dir.path(), &browser);

    let results = runner.capture_many(
        &urls(&["http://a.test", "http://b.test", "http://c.test"]),
        false,
        ImageFormat::Jpeg,
        Duration::ZERO,
    )?;

    assert_eq!(results.len(), 3);
    assert_eq!(results[1].status, 0);
    assert!(results[1].images.is_empty());
    assert_eq!(results[2].status, 200);
    assert_eq!(results[2].images.len(), 3);
    assert_eq!(runner.run_log().failed(), &[entry(2, "http://b.test")]);
    assert!(runner.run_log().http_errors().is_empty());
    assert!(!shot_path(dir.path(), "Desktop", "00002.jpeg").exists());

    let events = browser.events();
    assert_eq!(events.launches, 1);
    assert_eq!(events.session_closes, 1);
    assert_eq!(events.pages_opened, 3);
    assert_eq!(events.pages_closed, 3);
    Ok(())
}

#[test]
fn missing_response_counts_as_failure() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let browser = FakeBrowser::new();
    browser.behaviour().no_response.insert("http://a.test".into());
    let mut runner = runner(dir.path(), &browser);

    let results = runner.capture_many(
        &urls(&["http://a.test"]),
        false,
        ImageFormat::Jpeg,
        Duration::ZERO,
    )?;

    assert_eq!(results[0].status, 0);
    assert!(results[0].images.is_empty());
    assert_eq!(runner.run_log().failed(), &[entry(1, "http://a.test")]);
    Ok(())
}

#[test]
fn error_status_is_logged_but_still_captured() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let browser = FakeBrowser::new();
    browser
        .behaviour()
        .statuses
        .insert("http://a.test".into(), 404);
    let mut runner = runner(dir.path(), &browser);

    let results = runner.capture_many(
        &urls(&["http://a.test", "http://b.test"]),
        false,
        ImageFormat::Webp,
        Duration::ZERO,
    )?;

    assert_eq!(results[0].status, 404);
    assert_eq!(results[0].images.len(), 3);
    assert!(shot_path(dir.path(), "Mobile", "00001.webp").is_file());
    assert_eq!(runner.run_log().http_errors(), &[entry(1, "http://a.test")]);
    assert!(runner.run_log().failed().is_empty());
    Ok(())
}

#[test]
fn device_failure_keeps_earlier_images() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let browser = FakeBrowser::new();
    browser
        .behaviour()
        .fail_snapshot
        .insert("http://a.test".into(), DeviceKind::Tablet);
    let mut runner = runner(dir.path(), &browser);

    let results = runner.capture_many(
        &urls(&["http://a.test", "http://b.test"]),
        false,
        ImageFormat::Jpeg,
        Duration::ZERO,
    )?;

    assert_eq!(results[0].status, 0);
    assert_eq!(
        results[0].images.keys().copied().collect::<Vec<DeviceKind>>(),
        vec![DeviceKind::Desktop]
    );
    assert!(shot_path(dir.path(), "Desktop", "00001.jpeg").is_file());
    assert!(!shot_path(dir.path(), "Tablet", "00001.jpeg").exists());
    assert_eq!(results[1].images.len(), 3);
    assert_eq!(runner.run_log().failed(), &[entry(1, "http://a.test")]);
    assert!(runner.run_log().http_errors().is_empty());
    assert_eq!(browser.events().pages_closed, 2);
    Ok(())
}

#[test]
fn error_status_is_kept_when_a_device_fails_later() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let browser = FakeBrowser::new();
    {
        let mut b = browser.behaviour();
        b.statuses.insert("http://a.test".into(), 503);
        b.fail_snapshot
            .insert("http://a.test".into(), DeviceKind::Desktop);
    }
    let mut runner = runner(dir.path(), &browser);

    let results = runner.capture_many(
        &urls(&["http://a.test"]),
        false,
        ImageFormat::Jpeg,
        Duration::ZERO,
    )?;

    assert_eq!(results[0].status, 0);
    assert!(results[0].images.is_empty());
    assert_eq!(runner.run_log().failed(), &[entry(1, "http://a.test")]);
    assert_eq!(runner.run_log().http_errors(), &[entry(1, "http://a.test")]);
    Ok(())
}

#[test]
fn settle_delay_pauses_once_per_device() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let browser = FakeBrowser::new();
    let mut runner = runner(dir.path(), &browser);

    runner.capture_many(
        &urls(&["http://a.test"]),
        false,
        ImageFormat::Jpeg,
        Duration::ZERO,
    )?;
    assert!(browser.events().pauses.is_empty());

    runner.capture_many(
        &urls(&["http://a.test", "http://b.test"]),
        false,
        ImageFormat::Jpeg,
        Duration::from_millis(500),
    )?;
    let events = browser.events();
    assert_eq!(events.pauses.len(), 6);
    assert!(events
        .pauses
        .iter()
        .all(|p| *p == Duration::from_millis(500)));
    Ok(())
}

#[test]
fn settle_delay_above_limit_is_rejected() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let browser = FakeBrowser::new();
    let mut runner = runner(dir.path(), &browser);

    let err = runner
        .capture_many(
            &urls(&["http://a.test"]),
            false,
            ImageFormat::Jpeg,
            Duration::from_millis(10_001),
        )
        .err()
        .unwrap();
    assert!(matches!(
        err.downcast_ref::<ShotError>(),
        Some(ShotError::InvalidSettleDelay(10_001))
    ));

    // too large for u64 milliseconds, reported as the largest value
    let err = runner
        .capture_many(
            &urls(&["http://a.test"]),
            false,
            ImageFormat::Jpeg,
            Duration::from_secs(u64::MAX),
        )
        .err()
        .unwrap();
    assert!(matches!(
        err.downcast_ref::<ShotError>(),
        Some(ShotError::InvalidSettleDelay(u64::MAX))
    ));
    assert_eq!(browser.events().launches, 0);
    Ok(())
}

#[test]
fn launch_failure_aborts_the_batch() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let browser = FakeBrowser::new();
    browser.behaviour().fail_launch = true;
    let mut runner = runner(dir.path(), &browser);

    let err = runner
        .capture_many(
            &urls(&["http://a.test", "http://b.test"]),
            false,
            ImageFormat::Jpeg,
            Duration::ZERO,
        )
        .err()
        .unwrap();
    assert!(matches!(
        err.downcast_ref::<ShotError>(),
        Some(ShotError::SessionLaunch(_))
    ));

    let events = browser.events();
    assert_eq!(events.launches, 1);
    assert_eq!(events.session_closes, 0);
    assert!(events.navigations.is_empty());
    assert_eq!(runner.run_log().latest_attempt(), Some(&entry(1, "http://a.test")));
    assert!(runner.run_log().failed().is_empty());
    Ok(())
}

#[test]
fn session_is_released_once_per_batch() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let browser = FakeBrowser::new();
    browser
        .behaviour()
        .fail_navigation
        .insert("http://a.test".into());
    let mut runner = runner(dir.path(), &browser);

    runner.capture_many(
        &urls(&["http://a.test", "http://b.test"]),
        false,
        ImageFormat::Jpeg,
        Duration::ZERO,
    )?;
    assert_eq!(browser.events().launches, 1);
    assert_eq!(browser.events().session_closes, 1);

    runner.capture_many(
        &urls(&["http://c.test"]),
        false,
        ImageFormat::Jpeg,
        Duration::ZERO,
    )?;
    drop(runner);
    assert_eq!(browser.events().launches, 2);
    assert_eq!(browser.events().session_closes, 2);
    Ok(())
}

#[test]
fn empty_entries_do_not_take_an_index() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let browser = FakeBrowser::new();
    let mut runner = runner(dir.path(), &browser);

    let results = runner.capture_many(
        &urls(&["", "http://example.com", ""]),
        false,
        ImageFormat::Jpeg,
        Duration::ZERO,
    )?;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].index, 1);
    assert_eq!(
        runner.run_log().latest_attempt(),
        Some(&entry(1, "http://example.com"))
    );
    assert!(shot_path(dir.path(), "Desktop", "00001.jpeg").is_file());
    Ok(())
}

#[test]
fn capturing_an_empty_url_is_skipped_without_navigation() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let browser = FakeBrowser::new();
    let mut runner = runner(dir.path(), &browser);

    let outcome = runner.capture("", "00001", ImageFormat::Png, Duration::ZERO, 1)?;
    assert!(matches!(outcome, CaptureOutcome::Skipped(_)));
    assert!(!outcome.is_failure());
    assert_eq!(outcome.http_status(), None);

    let result = outcome.into_result();
    assert_eq!(result.index, 1);
    assert_eq!(result.status, 0);
    assert!(result.images.is_empty());

    let events = browser.events();
    assert!(events.navigations.is_empty());
    assert!(events.emulations.is_empty());
    assert_eq!(events.pages_opened, 1);
    assert_eq!(events.pages_closed, 1);
    Ok(())
}

#[test]
fn empty_batch_still_resets_output() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let browser = FakeBrowser::new();
    let mut runner = runner(dir.path(), &browser);
    let stale = shot_path(dir.path(), "Desktop", "00009.jpeg");
    fs::create_dir_all(stale.parent().unwrap())?;
    fs::write(&stale, b"old")?;
    fs::write(dir.path().join("screenshots.zip"), b"old zip")?;

    let results = runner.capture_many(&urls(&["", " "]), false, ImageFormat::Jpeg, Duration::ZERO)?;

    assert!(results.is_empty());
    assert!(!stale.exists());
    assert!(dir.path().join("screenshots").is_dir());
    assert!(!dir.path().join("screenshots.zip").exists());
    assert_eq!(browser.events().launches, 0);
    assert!(runner.run_log().latest_attempt().is_none());
    Ok(())
}

#[test]
fn reset_errors_clears_previous_failures() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let browser = FakeBrowser::new();
    {
        let mut b = browser.behaviour();
        b.fail_navigation.insert("http://a.test".into());
        b.statuses.insert("http://b.test".into(), 500);
    }
    let mut runner = runner(dir.path(), &browser);
    runner.capture_many(
        &urls(&["http://a.test", "http://b.test"]),
        false,
        ImageFormat::Jpeg,
        Duration::ZERO,
    )?;
    assert_eq!(runner.run_log().failed().len(), 1);
    assert_eq!(runner.run_log().http_errors().len(), 1);

    {
        let mut b = browser.behaviour();
        b.fail_navigation.clear();
        b.statuses.clear();
    }

    // without the flag earlier errors stay, with it they are forgotten
    runner.capture_many(&urls(&["http://c.test"]), false, ImageFormat::Jpeg, Duration::ZERO)?;
    assert_eq!(runner.run_log().failed().len(), 1);

    runner.capture_many(&urls(&["http://c.test"]), true, ImageFormat::Jpeg, Duration::ZERO)?;
    assert!(runner.run_log().failed().is_empty());
    assert!(runner.run_log().http_errors().is_empty());
    Ok(())
}

#[test]
fn run_log_survives_a_new_runner() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let browser = FakeBrowser::new();
    browser
        .behaviour()
        .fail_navigation
        .insert("http://b.test".into());
    {
        let mut runner = runner(dir.path(), &browser);
        runner.capture_many(
            &urls(&["http://a.test", "http://b.test"]),
            false,
            ImageFormat::Jpeg,
            Duration::ZERO,
        )?;
    }

    let runner = runner(dir.path(), &browser);
    assert_eq!(runner.run_log().failed(), &[entry(2, "http://b.test")]);
    assert_eq!(runner.run_log().latest_attempt(), Some(&entry(2, "http://b.test")));
    Ok(())
}

#[test]
fn pages_get_the_combined_request_filter() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let browser = FakeBrowser::new();
    let mut runner = runner(dir.path(), &browser);
    runner.capture_many(&urls(&["http://a.test"]), false, ImageFormat::Jpeg, Duration::ZERO)?;

    let events = browser.events();
    let filter = events.filter.as_ref().unwrap();
    // subscription list
    assert_eq!(filter.decide("https://cdn.ads.example/banner.js"), Decision::Deny);
    // built-in denylist
    assert_eq!(
        filter.decide("https://www.google-analytics.com/analytics.js"),
        Decision::Deny
    );
    assert_eq!(filter.decide("http://a.test/app.js"), Decision::Allow);
    Ok(())
}

#[test]
fn batch_request_drives_the_runner() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let browser = FakeBrowser::new();
    let mut runner = runner(dir.path(), &browser);
    let request = BatchRequest::new(urls(&["http://a.test"]), ImageFormat::Png, 100, false)?;

    let results = runner.run(&request)?;
    assert_eq!(results.len(), 1);
    assert_eq!(browser.events().pauses.len(), 3);
    assert!(shot_path(dir.path(), "Tablet", "00001.png").is_file());
    Ok(())
}

#[test]
fn exports_the_batch_as_zip() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let browser = FakeBrowser::new();
    let mut runner = runner(dir.path(), &browser);
    runner.capture_many(
        &urls(&["http://a.test", "http://b.test"]),
        false,
        ImageFormat::Jpeg,
        Duration::ZERO,
    )?;

    let bytes = runner.export()?;
    assert!(dir.path().join("screenshots.zip").is_file());
    let archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    assert_eq!(archive.len(), 6);
    Ok(())
}
