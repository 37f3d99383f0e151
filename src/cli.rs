use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Debug, Parser)]
#[command(name = "prospect")]
#[command(about = "会員ディレクトリから候補企業を集め、GPTで選別してGoogle Sheetsへ追記", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 設定ファイル (YAML)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: PathBuf,

    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// カタログを1つ処理してシートに追記
    Run {
        /// カタログキー（例: uspaacc）
        catalog: String,

        /// シートに書かず、書き込む予定の行をログに出す
        #[arg(long)]
        dry_run: bool,

        /// 処理する候補数の上限
        #[arg(long)]
        max_companies: Option<usize>,
    },

    /// 登録済みカタログの一覧
    Catalogs,
}
