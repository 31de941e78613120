use capture_core::{FileStatus, Phase, ProgressInfo, ProgressState, ResourceCategory};
use pretty_assertions::assert_eq;

fn assert_counts_consistent(info: &ProgressInfo) {
    assert_eq!(
        info.completed_files + info.failed_files + info.downloading_files + info.pending_files,
        info.file_list.len()
    );
    assert_eq!(info.total_files, info.file_list.len());
}

fn started(urls: &[&str]) -> ProgressState {
    let mut state = ProgressState::new();
    state.reset();
    state.begin_downloads(
        urls.iter()
            .map(|u| (u.to_string(), ResourceCategory::Images)),
    );
    state
}

#[test]
fn reset_enters_analyzing_with_empty_list() {
    let mut state = ProgressState::new();
    assert_eq!(state.phase(), Phase::Idle);
    state.reset();
    let info = state.snapshot();
    assert_eq!(info.phase, Phase::Analyzing);
    assert!(info.file_list.is_empty());
    assert_counts_consistent(&info);
}

#[test]
fn begin_downloads_registers_pending_files_once() {
    let state = {
        let mut s = started(&["https://ex.com/a.png", "https://ex.com/b.png"]);
        s.begin_downloads(vec![("https://ex.com/a.png".to_string(), ResourceCategory::Images)]);
        s
    };
    let info = state.snapshot();
    assert_eq!(info.phase, Phase::Downloading);
    assert_eq!(info.pending_files, 2);
    assert_eq!(info.file_list[0].name, "a.png");
    assert_counts_consistent(&info);
}

#[test]
fn counts_stay_consistent_through_every_transition() {
    let mut state = started(&["https://ex.com/1.png", "https://ex.com/2.png", "https://ex.com/3.png"]);
    assert_counts_consistent(&state.snapshot());

    state.set_file_status("https://ex.com/1.png", FileStatus::Downloading, 0);
    assert_counts_consistent(&state.snapshot());

    state.set_file_download_progress("https://ex.com/2.png", 10, Some(100), 10);
    let info = state.snapshot();
    assert_eq!(info.downloading_files, 2);
    assert_counts_consistent(&info);

    state.set_file_status("https://ex.com/1.png", FileStatus::Completed, 100);
    state.set_file_status("https://ex.com/2.png", FileStatus::Failed, 0);
    let info = state.snapshot();
    assert_eq!(info.completed_files, 1);
    assert_eq!(info.failed_files, 1);
    assert_eq!(info.pending_files, 1);
    assert_eq!(info.phase, Phase::Downloading);
    assert_counts_consistent(&info);
}

#[test]
fn settling_every_file_advances_to_saving() {
    let mut state = started(&["https://ex.com/1.png", "https://ex.com/2.png"]);
    state.set_file_status("https://ex.com/1.png", FileStatus::Completed, 100);
    assert_eq!(state.phase(), Phase::Downloading);
    state.set_file_status("https://ex.com/2.png", FileStatus::Failed, 0);
    assert_eq!(state.phase(), Phase::Saving);
}

#[test]
fn unknown_urls_are_ignored() {
    let mut state = started(&["https://ex.com/1.png"]);
    let before = state.snapshot();
    assert!(!state.set_file_status("https://ex.com/nope.png", FileStatus::Completed, 100));
    assert!(!state.set_file_size("https://ex.com/nope.png", 10));
    assert_eq!(state.snapshot(), before);
}

#[test]
fn file_size_sets_totals_and_label() {
    let mut state = started(&["https://ex.com/1.png"]);
    state.set_file_size("https://ex.com/1.png", 2048);
    let file = &state.snapshot().file_list[0];
    assert_eq!(file.size, "2.0 KB");
    assert_eq!(file.total_size, 2048);
    assert_eq!(file.downloaded_size, 2048);
}

#[test]
fn stop_overrides_phase() {
    let mut state = started(&["https://ex.com/1.png"]);
    state.mark_stopped();
    assert_eq!(state.snapshot().phase, Phase::Stopped);
}

#[test]
fn snapshot_serializes_with_lowercase_enums() {
    let mut state = started(&["https://ex.com/1.png"]);
    state.set_file_status("https://ex.com/1.png", FileStatus::Completed, 100);
    let json = serde_json::to_string(&state.snapshot()).unwrap();
    assert!(json.contains("\"phase\":\"saving\""));
    assert!(json.contains("\"status\":\"completed\""));
    assert!(json.contains("\"kind\":\"images\""));
    assert!(json.contains("\"completedFiles\":1"));
}
