use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

pub const EOS_TOKEN: &str = "<eos>";
pub const UNK_TOKEN: &str = "<unk>";

/// Word vocabulary with contiguous ids in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Dictionary {
    word2idx: HashMap<String, u32>,
    idx2word: Vec<String>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of `word`, assigning the next free id on first sight.
    pub fn add_word(&mut self, word: &str) -> u32 {
        if let Some(&id) = self.word2idx.get(word) {
            return id;
        }
        let id = self.idx2word.len() as u32;
        self.word2idx.insert(word.to_owned(), id);
        self.idx2word.push(word.to_owned());
        id
    }

    pub fn id(&self, word: &str) -> Option<u32> {
        self.word2idx.get(word).copied()
    }

    pub fn word(&self, id: u32) -> Option<&str> {
        self.idx2word.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.idx2word.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idx2word.is_empty()
    }

    /// Encodes one line against the frozen vocabulary, appending `<eos>`.
    /// Unknown words become `<unk>`.
    pub fn encode_line(&self, line: &str) -> Result<Vec<u32>> {
        let unk = self
            .id(UNK_TOKEN)
            .with_context(|| format!("dictionary has no {UNK_TOKEN} entry"))?;
        Ok(line
            .split_whitespace()
            .chain(std::iter::once(EOS_TOKEN))
            .map(|word| self.id(word).unwrap_or(unk))
            .collect())
    }
}

/// The three splits of a corpus encoded with the training vocabulary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Corpus {
    pub dictionary: Dictionary,
    pub train: Vec<u32>,
    pub valid: Vec<u32>,
    pub test: Vec<u32>,
}

impl Corpus {
    /// Reads the three split files under `dir`. Only the training split adds
    /// words to the dictionary.
    pub fn build(dir: impl AsRef<Path>, train: &str, valid: &str, test: &str) -> Result<Self> {
        let dir = dir.as_ref();
        let mut dictionary = Dictionary::new();

        let train = tokenize_growing(&dir.join(train), &mut dictionary)?;
        dictionary.add_word(UNK_TOKEN);
        let valid = tokenize_frozen(&dir.join(valid), &dictionary)?;
        let test = tokenize_frozen(&dir.join(test), &dictionary)?;

        Ok(Self {
            dictionary,
            train,
            valid,
            test,
        })
    }

    /// Loads the cached corpus for `dir` if present; otherwise builds it and
    /// writes the cache.
    pub fn load_or_build(
        dir: impl AsRef<Path>,
        train: &str,
        valid: &str,
        test: &str,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let cache = Self::cache_path(dir);

        if cache.is_file() {
            info!("loading cached corpus from {}", cache.display());
            let bytes =
                fs::read(&cache).with_context(|| format!("failed to read {}", cache.display()))?;
            return serde_json::from_slice(&bytes)
                .with_context(|| format!("failed to parse corpus cache {}", cache.display()));
        }

        info!("building corpus from {}", dir.display());
        let corpus = Self::build(dir, train, valid, test)?;
        let bytes = serde_json::to_vec(&corpus).context("failed to serialize corpus")?;
        fs::write(&cache, bytes)
            .with_context(|| format!("failed to write corpus cache {}", cache.display()))?;
        Ok(corpus)
    }

    /// `<dir>/corpus.<sha256 of the dir path>.data`
    pub fn cache_path(dir: impl AsRef<Path>) -> PathBuf {
        let dir = dir.as_ref();
        let digest = Sha256::digest(dir.to_string_lossy().as_bytes());
        let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
        dir.join(format!("corpus.{hex}.data"))
    }

    pub fn vocab_size(&self) -> usize {
        self.dictionary.len()
    }
}

fn read_split(path: &Path) -> Result<String> {
    ensure!(path.is_file(), "corpus split {} does not exist", path.display());
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn tokenize_growing(path: &Path, dictionary: &mut Dictionary) -> Result<Vec<u32>> {
    let text = read_split(path)?;
    let mut ids = Vec::new();
    for line in text.lines() {
        for word in line.split_whitespace().chain(std::iter::once(EOS_TOKEN)) {
            ids.push(dictionary.add_word(word));
        }
    }
    Ok(ids)
}

fn tokenize_frozen(path: &Path, dictionary: &Dictionary) -> Result<Vec<u32>> {
    let text = read_split(path)?;
    let mut ids = Vec::new();
    for line in text.lines() {
        ids.extend(dictionary.encode_line(line)?);
    }
    Ok(ids)
}
