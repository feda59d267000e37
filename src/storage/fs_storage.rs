//! Filesystem skill store.
//!
//! Every sub-directory of the root that contains a `SKILL.md` is a skill.
//! The file opens with YAML front-matter:
//!
//! ```text
//! ---
//! name: pdf
//! description: Extract text and tables from PDF documents
//! license: MIT
//! ---
//! ```
//!
//! Description embeddings are cached in `.capability_cache.json` at the
//! root: one JSON object mapping the skill directory to its capability and
//! embedding. The cache is loaded wholesale on open and rewritten
//! wholesale on every change.
//!
//! Skill names are unique across the store. When two folders declare the
//! same name, the first folder in path order is kept and the other is
//! skipped with a warning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::interface::{rank_by_similarity, CapabilityStore};
use crate::capabilities::{Capability, CapabilityMap};
use crate::rag::core::{cosine_similarity, Embedding, EmbeddingProvider};
use crate::utilities::errors::StoreError;

/// Name of the skill definition file inside each skill directory.
pub const SKILL_FILE: &str = "SKILL.md";
/// Name of the embedding cache file at the store root.
pub const CACHE_FILE: &str = ".capability_cache.json";

static FRONT_MATTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\A\s*---[ \t]*\r?\n(.*?)\r?\n---[ \t]*(?:\r?\n|\z)").unwrap());

/// YAML header of a `SKILL.md`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FrontMatter {
    name: String,
    description: String,
    /// Any other keys (license, metadata, allowed-tools, ...).
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// One cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedSkill {
    capability: Capability,
    embedding: Embedding,
}

type SkillCache = IndexMap<String, CachedSkill>;

/// Parse the front-matter of a `SKILL.md` document.
fn parse_front_matter(content: &str) -> Result<FrontMatter, StoreError> {
    let yaml = FRONT_MATTER
        .captures(content)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| StoreError::Corrupt("SKILL.md has no front-matter".to_string()))?;
    let front: FrontMatter = serde_yaml::from_str(yaml.as_str())?;
    if front.name.trim().is_empty() {
        return Err(StoreError::Corrupt("skill name is empty".to_string()));
    }
    Ok(front)
}

fn render_skill_file(front: &FrontMatter) -> Result<String, StoreError> {
    let yaml = serde_yaml::to_string(front)?;
    Ok(format!(
        "---\n{}---\n\n# {}\n\n{}\n",
        yaml, front.name, front.description
    ))
}

/// Skill capability for a directory, keeping the extra front-matter keys
/// and the directory path as its original body.
fn skill_from_front_matter(front: FrontMatter, dir: &Path) -> Capability {
    let mut body = front.extra;
    body.insert("path".to_string(), Value::String(dir.display().to_string()));
    Capability::skill(front.name, front.description, Value::Object(body))
}

/// Capability store over a directory of skill folders.
#[derive(Debug)]
pub struct FsCapabilityStore {
    root: PathBuf,
    cache_file: PathBuf,
    skills: RwLock<SkillCache>,
    /// Serializes insert, update, delete and rescans across their awaits.
    admin: tokio::sync::Mutex<()>,
    embedder: Arc<dyn EmbeddingProvider>,
}

/// Drop entries whose skill name was already seen, keeping the first.
fn dedup_by_name(entries: impl IntoIterator<Item = (String, CachedSkill)>) -> SkillCache {
    let mut owners: HashMap<String, String> = HashMap::new();
    let mut cache = SkillCache::new();
    for (path, skill) in entries {
        let name = skill.capability.name().to_string();
        if let Some(first) = owners.get(&name) {
            log::warn!(
                "Skill '{}' at {} duplicates the one at {}, skipping",
                name,
                path,
                first
            );
            continue;
        }
        owners.insert(name, path.clone());
        cache.insert(path, skill);
    }
    cache
}

impl FsCapabilityStore {
    /// Open the store rooted at `root`.
    ///
    /// With `init` the skill folders are scanned and the cache rebuilt;
    /// otherwise the existing cache file is loaded as is.
    pub async fn open(
        root: impl AsRef<Path>,
        embedder: Arc<dyn EmbeddingProvider>,
        init: bool,
    ) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        let store = Self {
            cache_file: root.join(CACHE_FILE),
            root,
            skills: RwLock::new(SkillCache::new()),
            admin: tokio::sync::Mutex::new(()),
            embedder,
        };
        if init {
            store.refresh_cache().await?;
        } else {
            store.load_cache().await;
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    pub fn len(&self) -> usize {
        self.skills.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.read().is_empty()
    }

    /// Load the cache file if present. A missing or unreadable cache leaves
    /// the store empty.
    async fn load_cache(&self) {
        let raw = match tokio::fs::read_to_string(&self.cache_file).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No skill cache at {}", self.cache_file.display());
                return;
            }
            Err(e) => {
                log::error!("Error loading skill cache {}: {}", self.cache_file.display(), e);
                return;
            }
        };
        match serde_json::from_str::<SkillCache>(&raw) {
            Ok(cache) => {
                let cache = dedup_by_name(cache.into_iter().map(|(path, entry)| {
                    let capability = entry.capability.with_embedding(entry.embedding.clone());
                    (path, CachedSkill { capability, embedding: entry.embedding })
                }));
                log::info!("Loaded {} skills from {}", cache.len(), self.cache_file.display());
                *self.skills.write() = cache;
            }
            Err(e) => log::error!("Error parsing skill cache {}: {}", self.cache_file.display(), e),
        }
    }

    async fn save_cache(&self) -> Result<(), StoreError> {
        let raw = serde_json::to_string_pretty(&*self.skills.read())?;
        tokio::fs::write(&self.cache_file, raw).await?;
        log::info!("Skill cache saved to {}", self.cache_file.display());
        Ok(())
    }

    /// Read and embed the skill in `dir`.
    async fn load_skill(&self, dir: &Path) -> Result<CachedSkill, StoreError> {
        let content = tokio::fs::read_to_string(dir.join(SKILL_FILE)).await?;
        let capability = skill_from_front_matter(parse_front_matter(&content)?, dir);
        let embedding = capability.embedding(&*self.embedder).await?.to_vec();
        Ok(CachedSkill { capability, embedding })
    }

    /// Empty the in-memory cache and remove the cache file.
    pub async fn clear_cache(&self) -> Result<(), StoreError> {
        let _admin = self.admin.lock().await;
        self.clear_unlocked().await
    }

    async fn clear_unlocked(&self) -> Result<(), StoreError> {
        self.skills.write().clear();
        match tokio::fs::remove_file(&self.cache_file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Rescan every skill folder, re-embed descriptions and rewrite the
    /// cache file. Folders that cannot be read are logged and skipped.
    ///
    /// Returns the number of skills loaded.
    pub async fn refresh_cache(&self) -> Result<usize, StoreError> {
        let _admin = self.admin.lock().await;
        self.clear_unlocked().await?;

        let mut dirs = Vec::new();
        let mut reader = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = reader.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();

        let mut scanned = Vec::with_capacity(dirs.len());
        for dir in dirs {
            match self.load_skill(&dir).await {
                Ok(skill) => scanned.push((dir.display().to_string(), skill)),
                Err(e) => log::error!("Error reading skill at {}: {}", dir.display(), e),
            }
        }
        let cache = dedup_by_name(scanned);
        for skill in cache.values() {
            log::info!("Loaded skill '{}'", skill.capability.name());
        }

        let loaded = cache.len();
        *self.skills.write() = cache;
        self.save_cache().await?;
        Ok(loaded)
    }

    fn find(&self, name: &str) -> Option<(String, Capability)> {
        self.skills
            .read()
            .iter()
            .find(|(_, skill)| skill.capability.name() == name)
            .map(|(path, skill)| (path.clone(), skill.capability.clone()))
    }

    /// Write `capability` as a `SKILL.md` under `dir` and return its cache
    /// entry.
    async fn write_skill(&self, dir: &Path, capability: &Capability) -> Result<CachedSkill, StoreError> {
        if !capability.is_skill() {
            return Err(StoreError::Unsupported(format!(
                "'{}' is a {}; only skills are stored as folders",
                capability.name(),
                capability.kind()
            )));
        }
        let mut extra = capability
            .original_body()
            .as_object()
            .cloned()
            .unwrap_or_default();
        extra.remove("path");
        let front = FrontMatter {
            name: capability.name().to_string(),
            description: capability.description().to_string(),
            extra,
        };

        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(dir.join(SKILL_FILE), render_skill_file(&front)?).await?;

        let capability = skill_from_front_matter(front, dir);
        let embedding = capability.embedding(&*self.embedder).await?.to_vec();
        Ok(CachedSkill { capability, embedding })
    }
}

#[async_trait]
impl CapabilityStore for FsCapabilityStore {
    fn backend(&self) -> &str {
        "fs"
    }

    async fn get_by_name(&self, name: &str) -> Option<Capability> {
        self.find(name).map(|(_, capability)| capability)
    }

    async fn search_by_similarity(
        &self,
        query_embedding: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> CapabilityMap {
        let scored = self
            .skills
            .read()
            .values()
            .map(|skill| {
                (
                    cosine_similarity(query_embedding, &skill.embedding),
                    skill.capability.clone(),
                )
            })
            .collect();
        rank_by_similarity(scored, limit, min_similarity)
    }

    async fn insert(&self, capability: Capability) -> Result<(), StoreError> {
        let _admin = self.admin.lock().await;
        let name = capability.name();
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(StoreError::Unsupported(format!(
                "'{}' is not usable as a skill directory name",
                name
            )));
        }
        if self.find(name).is_some() {
            return Err(StoreError::Duplicate(name.to_string()));
        }
        let dir = self.root.join(capability.name());
        if tokio::fs::try_exists(dir.join(SKILL_FILE)).await? {
            return Err(StoreError::Duplicate(capability.name().to_string()));
        }
        let skill = self.write_skill(&dir, &capability).await?;
        self.skills.write().insert(dir.display().to_string(), skill);
        self.save_cache().await
    }

    async fn update(&self, capability: Capability) -> Result<(), StoreError> {
        let _admin = self.admin.lock().await;
        let (path, _) = self
            .find(capability.name())
            .ok_or_else(|| StoreError::NotFound(capability.name().to_string()))?;
        let skill = self.write_skill(Path::new(&path), &capability).await?;
        self.skills.write().insert(path, skill);
        self.save_cache().await
    }

    /// Remove the skill and its folder from disk, including any files the
    /// author placed next to `SKILL.md`. Evicting only the cache entry would
    /// bring the skill back on the next rescan.
    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let _admin = self.admin.lock().await;
        let Some((path, _)) = self.find(name) else {
            return Ok(false);
        };
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.skills.write().shift_remove(&path);
        self.save_cache().await?;
        Ok(true)
    }

    async fn list(&self, limit: usize) -> Vec<Capability> {
        self.skills
            .read()
            .values()
            .take(limit)
            .map(|skill| skill.capability.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::core::testing::KeywordEmbedder;
    use tempfile::TempDir;

    fn write_skill_dir(root: &Path, dir: &str, body: &str) {
        let path = root.join(dir);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join(SKILL_FILE), body).unwrap();
    }

    fn populate(root: &Path) {
        write_skill_dir(
            root,
            "pdf",
            "---\nname: pdf\ndescription: Extract text from PDF documents\nlicense: MIT\n---\n\n# PDF\n",
        );
        write_skill_dir(
            root,
            "algorithmic-art",
            "---\nname: algorithmic-art\ndescription: Generative art with p5.js\n---\nbody\n",
        );
        write_skill_dir(root, "broken", "no front matter here");
    }

    #[test]
    fn test_parse_front_matter_keeps_extra_keys() {
        let front =
            parse_front_matter("---\nname: pdf\ndescription: PDFs\nlicense: MIT\n---\nrest").unwrap();
        assert_eq!(front.name, "pdf");
        assert_eq!(front.extra["license"], "MIT");
    }

    #[test]
    fn test_parse_front_matter_rejects_missing_header() {
        assert!(parse_front_matter("# Title only").is_err());
        assert!(parse_front_matter("---\ndescription: no name\n---\n").is_err());
    }

    #[test]
    fn test_rendered_file_parses_back() {
        let front = FrontMatter {
            name: "notes".to_string(),
            description: "Keep notes".to_string(),
            extra: Map::new(),
        };
        let parsed = parse_front_matter(&render_skill_file(&front).unwrap()).unwrap();
        assert_eq!(parsed.name, "notes");
        assert_eq!(parsed.description, "Keep notes");
    }

    #[tokio::test]
    async fn test_init_scans_and_skips_broken_folders() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        let store = FsCapabilityStore::open(dir.path(), Arc::new(KeywordEmbedder::topics()), true)
            .await
            .unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.cache_file().exists());
        let pdf = store.get_by_name("pdf").await.unwrap();
        assert!(pdf.is_skill());
        assert_eq!(pdf.original_body()["license"], "MIT");
    }

    #[tokio::test]
    async fn test_reopen_from_cache_skips_embedding() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        FsCapabilityStore::open(dir.path(), Arc::new(KeywordEmbedder::topics()), true)
            .await
            .unwrap();

        let embedder = Arc::new(KeywordEmbedder::topics());
        let store = FsCapabilityStore::open(dir.path(), embedder.clone(), false).await.unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(embedder.calls(), 0);
        assert!(store.get_by_name("algorithmic-art").await.unwrap().cached_embedding().is_some());
    }

    #[tokio::test]
    async fn test_search_sorts_and_filters() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        let embedder = Arc::new(KeywordEmbedder::topics());
        let store = FsCapabilityStore::open(dir.path(), embedder.clone(), true).await.unwrap();

        let query = embedder.embed("read this pdf document").await.unwrap();
        let hits = store.search_by_similarity(&query, 5, 0.5).await;
        assert_eq!(hits.keys().collect::<Vec<_>>(), vec!["pdf"]);

        let all = store.search_by_similarity(&query, 1, 0.0).await;
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("pdf"));
    }

    #[tokio::test]
    async fn test_clear_cache_removes_file() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        let store = FsCapabilityStore::open(dir.path(), Arc::new(KeywordEmbedder::topics()), true)
            .await
            .unwrap();
        store.clear_cache().await.unwrap();
        assert!(store.is_empty());
        assert!(!store.cache_file().exists());
        assert_eq!(store.refresh_cache().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_missing_cache_opens_empty() {
        let dir = TempDir::new().unwrap();
        let store = FsCapabilityStore::open(dir.path(), Arc::new(KeywordEmbedder::topics()), false)
            .await
            .unwrap();
        assert!(store.is_empty());
        assert!(store.list(10).await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_skill_names_keep_first_folder() {
        let dir = TempDir::new().unwrap();
        write_skill_dir(dir.path(), "pdf-a", "---\nname: pdf\ndescription: Read PDF files\n---\n");
        write_skill_dir(dir.path(), "pdf-b", "---\nname: pdf\ndescription: Write PDF documents\n---\n");
        let store = FsCapabilityStore::open(dir.path(), Arc::new(KeywordEmbedder::topics()), true)
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        let names: Vec<String> = store.list(10).await.iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["pdf"]);
        let pdf = store.get_by_name("pdf").await.unwrap();
        assert_eq!(pdf.description(), "Read PDF files");

        let reopened = FsCapabilityStore::open(dir.path(), Arc::new(KeywordEmbedder::topics()), false)
            .await
            .unwrap();
        assert_eq!(reopened.len(), 1);
    }

    #[tokio::test]
    async fn test_insert_rejects_name_held_by_other_folder() {
        let dir = TempDir::new().unwrap();
        write_skill_dir(dir.path(), "pdf-tools", "---\nname: pdf\ndescription: Read PDF files\n---\n");
        let store = FsCapabilityStore::open(dir.path(), Arc::new(KeywordEmbedder::topics()), true)
            .await
            .unwrap();

        let clash = Capability::skill("pdf", "Another PDF skill", Value::Null);
        assert!(matches!(store.insert(clash).await, Err(StoreError::Duplicate(_))));
        assert!(!dir.path().join("pdf").exists());
    }

    #[tokio::test]
    async fn test_concurrent_inserts_of_one_name() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            FsCapabilityStore::open(dir.path(), Arc::new(KeywordEmbedder::topics()), true)
                .await
                .unwrap(),
        );

        let attempts: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let skill = Capability::skill("notes", format!("notes variant {}", i), Value::Null);
                    store.insert(skill).await
                })
            })
            .collect();

        let mut inserted = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(()) => inserted += 1,
                Err(e) => assert!(matches!(e, StoreError::Duplicate(_))),
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_insert_update_delete() {
        let dir = TempDir::new().unwrap();
        let store = FsCapabilityStore::open(dir.path(), Arc::new(KeywordEmbedder::topics()), true)
            .await
            .unwrap();

        let skill = Capability::skill("notes", "Count letters in notes", serde_json::json!({"license": "MIT"}));
        store.insert(skill.clone()).await.unwrap();
        assert!(dir.path().join("notes").join(SKILL_FILE).exists());
        assert!(matches!(store.insert(skill).await, Err(StoreError::Duplicate(_))));

        let function = crate::tools::builtin::builtin_capabilities().remove(0);
        assert!(matches!(store.insert(function).await, Err(StoreError::Unsupported(_))));

        let changed = Capability::skill("notes", "Spell checking notes", Value::Null);
        store.update(changed).await.unwrap();
        assert_eq!(store.get_by_name("notes").await.unwrap().description(), "Spell checking notes");

        assert!(store.delete("notes").await.unwrap());
        assert!(!dir.path().join("notes").exists());
        assert!(!store.delete("notes").await.unwrap());
    }
}
