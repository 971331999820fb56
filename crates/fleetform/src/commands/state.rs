use crate::utils;
use anyhow::Context;
use colored::Colorize;
use fleetform_resource::Urn;
use fleetform_state::{CURRENT_VERSION, ResourceStatus, StateManager};
use std::path::Path;

use super::super::StateCommands;

pub async fn handle(cmd: StateCommands, state_dir: Option<&Path>) -> anyhow::Result<()> {
    // migrate はファイル単位の操作なので設定ファイル不要
    if let StateCommands::Migrate { file, to, output } = cmd {
        return migrate(&file, to, output.as_deref()).await;
    }

    let manager = utils::state_manager(state_dir)?;
    match cmd {
        StateCommands::List => list(&manager).await,
        StateCommands::Show { stack } => show(&manager, &stack).await,
        StateCommands::Verify { stack } => verify(&manager, &stack).await,
        StateCommands::Resolve { stack, urn } => resolve(&manager, &stack, &urn).await,
        StateCommands::Unlock { stack, force } => unlock(&manager, &stack, force).await,
        StateCommands::Migrate { .. } => Ok(()),
    }
}

async fn list(manager: &StateManager) -> anyhow::Result<()> {
    let stacks = manager.list_stacks().await?;
    if stacks.is_empty() {
        println!(
            "{}",
            format!(
                "{} にチェックポイントはありません",
                manager.state_dir().display()
            )
            .yellow()
        );
        return Ok(());
    }

    println!("{}", format!("スタック ({}個):", stacks.len()).bold());
    for stack in &stacks {
        let locked = if manager.lock_info(stack).await?.is_some() {
            format!(" {}", "[locked]".yellow())
        } else {
            String::new()
        };
        match manager.load(stack).await {
            Ok(snapshot) => println!(
                "  - {} ({}個のリソース){}",
                stack.cyan(),
                snapshot.len(),
                locked
            ),
            Err(e) => println!("  - {} {}{}", stack.cyan(), format!("✗ {}", e).red(), locked),
        }
    }
    Ok(())
}

async fn show(manager: &StateManager, stack: &str) -> anyhow::Result<()> {
    if !tokio::fs::try_exists(manager.state_path(stack)).await? {
        anyhow::bail!(
            "スタック '{}' のチェックポイントが見つかりません: {}",
            stack,
            manager.state_path(stack).display()
        );
    }
    let snapshot = manager
        .load(stack)
        .await
        .with_context(|| format!("スタック '{}' の読み込みに失敗しました", stack))?;

    println!("{}", format!("スタック: {}", snapshot.stack).blue().bold());
    println!(
        "  最終更新: {} (fleetform {})",
        snapshot.manifest.time.to_rfc3339(),
        snapshot.manifest.version
    );
    if !snapshot.manifest.plugins.is_empty() {
        println!("  プラグイン:");
        for plugin in &snapshot.manifest.plugins {
            println!("    - {} {}", plugin.name.cyan(), plugin.version);
        }
    }
    if !snapshot.config.is_empty() {
        println!("  設定:");
        for (key, value) in &snapshot.config {
            let shown = if value.secret {
                "[secret]".dimmed().to_string()
            } else {
                value.value.clone()
            };
            println!("    {} = {}", key, shown);
        }
    }

    println!();
    println!("{}", format!("リソース ({}個):", snapshot.len()).bold());
    for record in snapshot.resources() {
        let id = if record.id.is_empty() {
            "(未作成)".to_string()
        } else {
            record.id.clone()
        };
        let protect = if record.protect {
            format!(" {}", "[protected]".magenta())
        } else {
            String::new()
        };
        println!(
            "  - {} [{}] {}{}",
            record.urn.to_string().cyan(),
            utils::status_label(record.status),
            id,
            protect
        );
        for dependency in &record.dependencies {
            println!("      └ {}", dependency.to_string().dimmed());
        }
    }

    let pending = snapshot.pending();
    if !pending.is_empty() {
        println!();
        println!(
            "{}",
            format!(
                "⚠ {}個のリソースが中断された操作を持っています（次回の実行時に Read で照合されます）",
                pending.len()
            )
            .yellow()
        );
    }
    let indeterminate = snapshot
        .resources()
        .iter()
        .filter(|r| r.status == ResourceStatus::Indeterminate)
        .count();
    if indeterminate > 0 {
        println!(
            "{}",
            format!(
                "⚠ {}個のリソースが Indeterminate です。確認後 'fleetform state resolve' を実行してください",
                indeterminate
            )
            .red()
        );
    }
    Ok(())
}

async fn verify(manager: &StateManager, stack: &str) -> anyhow::Result<()> {
    println!("{}", format!("スタック '{}' を検証中...", stack).blue());
    let path = manager.state_path(stack);
    if !tokio::fs::try_exists(&path).await? {
        anyhow::bail!(
            "スタック '{}' のチェックポイントが見つかりません: {}",
            stack,
            path.display()
        );
    }

    let checked = match manager.load(stack).await {
        Ok(snapshot) => snapshot.verify_integrity(true).map(|_| snapshot),
        Err(e) => Err(e),
    };
    let snapshot = match checked {
        Ok(snapshot) => snapshot,
        Err(e) => {
            println!("{}", "✗ チェックポイントに問題があります".red().bold());
            return Err(anyhow::Error::new(e).context(format!("{}", path.display())));
        }
    };

    println!("{}", "✓ チェックポイントは正常です！".green().bold());
    println!("  リソース: {}個", snapshot.len());
    println!("  保留中の操作: {}個", snapshot.pending().len());

    match manager.load_backup(stack).await {
        Ok(Some(backup)) => println!("  バックアップ: {}個のリソース", backup.len()),
        Ok(None) => println!("  バックアップ: なし"),
        Err(e) => println!("  バックアップ: {}", format!("読み込めません ({})", e).yellow()),
    }
    if let Some(info) = manager.lock_info(stack).await? {
        println!(
            "  ロック: {} (pid {}) {}",
            info.holder,
            info.pid,
            info.acquired_at.to_rfc3339()
        );
    }
    Ok(())
}

async fn migrate(file: &Path, to: u32, output: Option<&Path>) -> anyhow::Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("{} を読み込めません", file.display()))?;
    let from = fleetform_state::decode_checkpoint(&text)
        .with_context(|| format!("{} はチェックポイントではありません", file.display()))?
        .version();
    let migrated = fleetform_state::migrate_document(&text, to)
        .with_context(|| format!("v{} から v{} への変換に失敗しました", from, to))?;

    match output {
        Some(output) => {
            tokio::fs::write(output, format!("{}\n", migrated))
                .await
                .with_context(|| format!("{} に書き込めません", output.display()))?;
            println!(
                "{}",
                format!("✓ v{} → v{} に変換しました: {}", from, to, output.display())
                    .green()
                    .bold()
            );
        }
        None => println!("{}", migrated),
    }
    if to < CURRENT_VERSION {
        // stdoutを汚さないようstderrへ
        eprintln!(
            "{}",
            format!(
                "⚠ v{} より前の形式では一部の情報が失われます",
                CURRENT_VERSION
            )
            .yellow()
        );
    }
    Ok(())
}

async fn resolve(manager: &StateManager, stack: &str, urn: &str) -> anyhow::Result<()> {
    let urn = Urn::parse(urn).context("URNが不正です")?;
    let lock = manager
        .acquire_lock(stack)
        .await
        .with_context(|| format!("スタック '{}' のロックを取得できません", stack))?;

    let mut snapshot = manager.load(stack).await?;
    snapshot.resolve_indeterminate(&urn)?;
    manager.save(&snapshot).await?;
    lock.release().await?;

    println!(
        "{}",
        format!("✓ {} を created としてマークしました", urn)
            .green()
            .bold()
    );
    Ok(())
}

async fn unlock(manager: &StateManager, stack: &str, force: bool) -> anyhow::Result<()> {
    let Some(info) = manager.lock_info(stack).await? else {
        println!("スタック '{}' はロックされていません", stack.cyan());
        return Ok(());
    };

    println!(
        "ロック保持者: {} (pid {}) {}",
        info.holder,
        info.pid,
        info.acquired_at.to_rfc3339()
    );
    if !force && !info.is_stale(manager.stale_after()) {
        anyhow::bail!(
            "ロックはまだ有効です。実行中のデプロイがないことを確認してから --force を指定してください"
        );
    }

    manager.force_unlock(stack).await?;
    println!("{}", "✓ ロックを解除しました".green().bold());
    Ok(())
}
