use anyhow::Context;
use colored::{ColoredString, Colorize};
use fleetform_state::{ResourceStatus, StateManager};
use std::path::Path;

/// 設定ファイルに従って StateManager を作る
///
/// `state_dir` が指定されていれば設定ファイルの値より優先する
pub fn state_manager(state_dir: Option<&Path>) -> anyhow::Result<StateManager> {
    let config = fleetform_config::load_config().context("設定の読み込みに失敗しました")?;
    let dir = match state_dir {
        Some(dir) => dir.to_path_buf(),
        None => config.state_dir.clone(),
    };
    tracing::debug!("Using state directory {}", dir.display());
    Ok(StateManager::new(dir).with_stale_after(config.lock_stale_after()))
}

pub fn status_label(status: ResourceStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        ResourceStatus::Created => label.green(),
        ResourceStatus::External => label.cyan(),
        ResourceStatus::PendingCreate | ResourceStatus::PendingDelete => label.yellow(),
        ResourceStatus::Indeterminate => label.red().bold(),
    }
}
