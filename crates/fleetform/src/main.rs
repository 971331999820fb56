mod commands;
mod utils;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fleetform")]
#[command(about = "宣言する。収束する。インフラの状態は、途切れない。", long_about = None)]
struct Cli {
    /// 状態ディレクトリ（設定ファイルの state_dir を上書き）
    #[arg(long, global = true, env = "FLEETFORM_STATE_DIR")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// スタックの状態（チェックポイント）を管理
    #[command(subcommand)]
    State(StateCommands),
    /// プロバイダープロトコルのスキーマをJSONで表示
    Schema,
    /// バージョン情報を表示
    Version,
}

/// 状態管理のサブコマンド
#[derive(Subcommand)]
enum StateCommands {
    /// チェックポイントのあるスタックの一覧を表示
    List,
    /// スタックのリソースと状態を表示
    Show {
        /// スタック名
        stack: String,
    },
    /// チェックポイントの整合性を検証
    Verify {
        /// スタック名
        stack: String,
    },
    /// チェックポイントファイルを別のスキーマバージョンに変換
    Migrate {
        /// 変換元のチェックポイントファイル
        file: PathBuf,
        /// 変換先のスキーマバージョン
        #[arg(long)]
        to: u32,
        /// 出力先（省略時は標準出力）
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Indeterminate 状態のリソースを確認済みとしてマーク
    Resolve {
        /// スタック名
        stack: String,
        /// リソースURN
        urn: String,
    },
    /// 放棄されたロックを解除
    Unlock {
        /// スタック名
        stack: String,
        /// 有効期限内のロックも解除する
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdoutはスキーマやチェックポイントの出力に使うので、ログはstderrへ
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match cli.command {
        Commands::State(cmd) => commands::state::handle(cmd, cli.state_dir.as_deref()).await?,
        Commands::Schema => commands::schema::handle()?,
        Commands::Version => {
            println!("fleetform {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
