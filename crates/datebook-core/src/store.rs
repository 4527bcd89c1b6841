use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

use crate::item::Item;

/// Durability for the item collection: one JSON-lines file, rewritten
/// atomically on every change. Last write wins; there is no merge logic.
#[derive(Debug)]
pub struct ItemStore {
    pub data_dir: PathBuf,
    pub items_path: PathBuf,
}

impl ItemStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let items_path = data_dir.join("items.data");
        if !items_path.exists() {
            fs::write(&items_path, "")?;
        }

        info!(
            data_dir = %data_dir.display(),
            items = %items_path.display(),
            "opened item store"
        );

        Ok(Self {
            data_dir,
            items_path,
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn load_all(&self) -> anyhow::Result<Vec<Item>> {
        load_jsonl(&self.items_path).context("failed to load items.data")
    }

    #[tracing::instrument(skip(self, items))]
    pub fn save_all(&self, items: &[Item]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.items_path, items).context("failed to save items.data")
    }

    pub fn next_id(&self, items: &[Item]) -> u64 {
        items.iter().filter_map(|item| item.id).max().unwrap_or(0) + 1
    }

    /// Appends the item and persists, returning it with its display id in
    /// place. Display ids stay sorted in the file for readable exports.
    #[tracing::instrument(skip(self, items, item), fields(id = ?item.id, uuid = %item.uuid))]
    pub fn insert(&self, mut items: Vec<Item>, mut item: Item) -> anyhow::Result<Item> {
        if item.id.is_none() {
            item.id = Some(self.next_id(&items));
        }
        items.push(item.clone());
        items.sort_by_key(|i| i.id.unwrap_or(u64::MAX));
        self.save_all(&items)?;

        debug!(count = items.len(), "item inserted");
        Ok(item)
    }

    /// Applies a partial change to the item with the given uuid and
    /// persists the whole collection.
    #[tracing::instrument(skip(self, apply), fields(uuid = %uuid))]
    pub fn update<F>(&self, uuid: Uuid, apply: F) -> anyhow::Result<Item>
    where
        F: FnOnce(&mut Item),
    {
        let mut items = self.load_all()?;
        let target = items
            .iter_mut()
            .find(|item| item.uuid == uuid)
            .ok_or_else(|| anyhow!("item not found: {uuid}"))?;

        apply(target);
        let updated = target.clone();
        self.save_all(&items)?;
        Ok(updated)
    }

    #[tracing::instrument(skip(self), fields(uuid = %uuid))]
    pub fn delete(&self, uuid: Uuid) -> anyhow::Result<Item> {
        let mut items = self.load_all()?;
        let idx = items
            .iter()
            .position(|item| item.uuid == uuid)
            .ok_or_else(|| anyhow!("item not found: {uuid}"))?;

        let removed = items.remove(idx);
        self.save_all(&items)?;

        debug!(count = items.len(), "item deleted");
        Ok(removed)
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> anyhow::Result<Vec<Item>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let item: Item = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(item);
    }

    debug!(count = out.len(), "loaded items from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, items))]
fn save_jsonl_atomic(path: &Path, items: &[Item]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = items.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for item in items {
        let serialized = serde_json::to_string(item)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
