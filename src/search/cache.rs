//! 検索結果キャッシュ
//!
//! 会社名 → 公式サイトURL（見つからなかった場合も含む）を JSON ファイルに保存し、
//! 次回以降の実行で検索APIの呼び出しを省く。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::{debug, warn};

/// キャッシュファイルの構造
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCache {
    version: u32,
    /// 会社名 → URL（`None` は「該当なし」）
    entries: HashMap<String, Option<String>>,
}

impl SearchCache {
    const CURRENT_VERSION: u32 = 1;

    /// 読み込めない・形式が違う場合は空のキャッシュ
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                warn!("Failed to open search cache {}: {}", path.display(), e);
                return Self::default();
            }
        };

        match serde_json::from_reader::<_, SearchCache>(BufReader::new(file)) {
            Ok(cache) if cache.version == Self::CURRENT_VERSION => {
                debug!("Loaded {} cached search answers", cache.entries.len());
                cache
            }
            Ok(_) => {
                warn!("Search cache version mismatch, starting fresh");
                Self::default()
            }
            Err(e) => {
                warn!("Search cache is unreadable ({}), starting fresh", e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// `Some(None)` はキャッシュ済みの「該当なし」
    pub fn get(&self, company: &str) -> Option<Option<&str>> {
        self.entries.get(company).map(|url| url.as_deref())
    }

    pub fn insert(&mut self, company: impl Into<String>, url: Option<String>) {
        self.entries.insert(company.into(), url);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SearchCache {
    fn default() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            entries: HashMap::new(),
        }
    }
}
