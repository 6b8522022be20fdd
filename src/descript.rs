// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// `descript.txt`: the `key,value` manifest shipped in `ghost/master`.

use std::collections::HashMap;
use std::path::Path;

use crate::{Error, Result};

/// Key naming the ghost's SHIORI module.
pub const SHIORI_KEY: &str = "shiori";

/// Module name assumed when a manifest has no `shiori` entry.
pub const DEFAULT_SHIORI: &str = "shiori.dll";

/// Parsed manifest. Later duplicates overwrite earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descript {
    entries: HashMap<String, String>,
}

impl Descript {
    /// Parse decoded text. Lines starting with `//`, blank lines and lines
    /// without a comma are skipped; key and value are trimmed.
    pub fn parse(text: &str) -> Self {
        let mut entries = HashMap::new();
        for line in text.lines() {
            let line = line.trim_start_matches('\u{feff}');
            if line.trim_start().starts_with("//") {
                continue;
            }
            let Some((key, value)) = line.split_once(',') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            entries.insert(key.to_owned(), value.trim().to_owned());
        }
        Self { entries }
    }

    /// Decode raw file bytes: UTF-8 when valid, Shift_JIS otherwise.
    pub fn decode(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => Self::parse(text),
            Err(_) => {
                let (text, had_errors) = encoding_rs::SHIFT_JIS.decode_without_bom_handling(bytes);
                if had_errors {
                    tracing::debug!("descript.txt is neither UTF-8 nor clean Shift_JIS");
                }
                Self::parse(&text)
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| Error::system(format!("read {}", path.display()), e))?;
        Ok(Self::decode(&bytes))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `shiori` entry, or [`DEFAULT_SHIORI`].
    pub fn shiori(&self) -> &str {
        self.get(SHIORI_KEY).filter(|s| !s.is_empty()).unwrap_or(DEFAULT_SHIORI)
    }

    /// `yaya.dic`, then `yaya.dic2`, `yaya.dic3`, … up to the first gap.
    pub fn yaya_dics(&self) -> Vec<String> {
        let mut dics: Vec<String> = self.get("yaya.dic").map(str::to_owned).into_iter().collect();
        dics.extend((2..).map_while(|i| self.get(&format!("yaya.dic{i}")).map(str::to_owned)));
        dics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entries_and_skips_noise() {
        let d = Descript::parse(
            "// comment, with comma\r\ncharset,UTF-8\r\n\r\nname , Emily \r\nno comma\r\n,orphan\r\nshiori,yaya.dll\r\n",
        );
        assert_eq!(d.get("charset"), Some("UTF-8"));
        assert_eq!(d.get("name"), Some("Emily"));
        assert_eq!(d.shiori(), "yaya.dll");
        assert_eq!(d.len(), 3);
    }

    #[test]
    fn value_keeps_later_commas() {
        let d = Descript::parse("sakura.seriko.defaultsurface,0,1\n");
        assert_eq!(d.get("sakura.seriko.defaultsurface"), Some("0,1"));
    }

    #[test]
    fn yaya_dics_stop_at_gap() {
        let d = Descript::parse("yaya.dic,a.dic\nyaya.dic2,b.dic\nyaya.dic3,c.dic\nyaya.dic5,e.dic\n");
        assert_eq!(d.yaya_dics(), vec!["a.dic", "b.dic", "c.dic"]);
    }

    #[test]
    fn missing_shiori_defaults() {
        assert_eq!(Descript::default().shiori(), DEFAULT_SHIORI);
    }

    #[test]
    fn shift_jis_bytes_decode() {
        let (bytes, _, _) = encoding_rs::SHIFT_JIS.encode("name,さくら\r\n");
        let d = Descript::decode(&bytes);
        assert_eq!(d.get("name"), Some("さくら"));
    }

    #[test]
    fn utf8_bom_is_ignored() {
        let d = Descript::decode("\u{feff}charset,UTF-8\n".as_bytes());
        assert_eq!(d.get("charset"), Some("UTF-8"));
    }
}
