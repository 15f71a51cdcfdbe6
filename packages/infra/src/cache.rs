//! # ファイルシステムキャッシュ
//!
//! タグによる一括無効化に対応したファイルシステムキャッシュと、
//! 名前付きでキャッシュプールを管理するレジストリ。
//!
//! ## ディレクトリ構成
//!
//! ```text
//! {directory}/{namespace}/
//!   items/{hash[0..2]}/{hash}   … エントリ本体（JSON）
//!   tags/{tag_hash}/{hash}      … タグ → エントリの参照
//! ```
//!
//! `hash` はキーの SHA-256（16 進）。エントリは同じディレクトリの一意な
//! 一時ファイルに書いてからリネームするため、読み取り側が書きかけの内容を
//! 見ることはなく、同じキーへの並行書き込みも衝突しない。
//!
//! ## 有効期限
//!
//! 期限切れのエントリは `get` / `has` の時点でミス扱いになり削除される。
//! 読まれないまま残ったエントリは [`Pruneable::prune`] で掃除する。

use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use pixiekat_domain::{Clock, SystemClock};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};

use crate::error::InfraError;

/// キーに使えない文字
pub const RESERVED_CHARACTERS: &str = "{}()/\\@:";

/// 期限切れエントリを削除できるキャッシュ
pub trait Pruneable: Send + Sync {
    /// 期限切れのエントリを削除し、削除した件数を返す
    fn prune(&self) -> Result<usize, InfraError>;
}

/// ディスク上のエントリ
#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    key:        String,
    expires_at: Option<DateTime<Utc>>,
    tags:       Vec<String>,
    value:      serde_json::Value,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// タグ対応ファイルシステムキャッシュ
pub struct FilesystemTagAwareCache {
    namespace:        String,
    default_lifetime: Duration,
    base:             PathBuf,
    clock:            Arc<dyn Clock>,
}

impl std::fmt::Debug for FilesystemTagAwareCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesystemTagAwareCache")
            .field("namespace", &self.namespace)
            .field("default_lifetime", &self.default_lifetime)
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

impl FilesystemTagAwareCache {
    /// キャッシュを作成する
    ///
    /// `default_lifetime` がゼロの場合、エントリは期限切れにならない。
    /// ディレクトリは最初の書き込み時に作成する。
    pub fn new(
        namespace: impl Into<String>,
        default_lifetime: Duration,
        directory: impl AsRef<Path>,
    ) -> Result<Self, InfraError> {
        let namespace = namespace.into();
        validate(&namespace)?;
        Ok(Self {
            base: directory.as_ref().join(&namespace),
            namespace,
            default_lifetime,
            clock: Arc::new(SystemClock),
        })
    }

    /// 時刻プロバイダを差し替える
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn default_lifetime(&self) -> Duration {
        self.default_lifetime
    }

    /// このキャッシュが使うディレクトリ（`{directory}/{namespace}`）
    pub fn directory(&self) -> &Path {
        &self.base
    }

    /// 値を取得する。ミスまたは期限切れなら `None`
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, InfraError> {
        validate(key)?;
        match self.read_entry(key)? {
            Some(entry) => Ok(Some(serde_json::from_value(entry.value)?)),
            None => Ok(None),
        }
    }

    /// 値が存在するか（期限切れは存在しない扱い）
    pub fn has(&self, key: &str) -> Result<bool, InfraError> {
        validate(key)?;
        Ok(self.read_entry(key)?.is_some())
    }

    /// 既定の有効期限で値を保存する
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), InfraError> {
        self.set_with(key, value, None, &[])
    }

    /// 有効期限とタグを指定して値を保存する
    ///
    /// `ttl` が `None` なら既定の有効期限を使う。
    pub fn set_with<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        tags: &[&str],
    ) -> Result<(), InfraError> {
        validate(key)?;
        for tag in tags {
            validate(tag)?;
        }

        // 古いタグの参照を残さない
        self.remove_entry(key)?;

        let lifetime = ttl.unwrap_or(self.default_lifetime);
        let expires_at = if lifetime.is_zero() {
            None
        } else {
            chrono::Duration::from_std(lifetime)
                .ok()
                .and_then(|d| self.clock.now().checked_add_signed(d))
        };
        let entry = Entry {
            key: key.to_string(),
            expires_at,
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
            value: serde_json::to_value(value)?,
        };

        let hash = digest(key);
        write_atomic(&self.item_path(&hash), &serde_json::to_vec(&entry)?)?;
        for tag in tags {
            write_atomic(&self.tag_dir(tag).join(&hash), key.as_bytes())?;
        }

        tracing::trace!(namespace = %self.namespace, key, "キャッシュに保存しました");
        Ok(())
    }

    /// 値を取得し、なければ `init` の結果を保存して返す
    pub fn get_or_insert_with<T, F>(&self, key: &str, init: F) -> Result<T, InfraError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(value) = self.get(key)? {
            return Ok(value);
        }
        let value = init();
        self.set(key, &value)?;
        Ok(value)
    }

    /// エントリを削除する。存在しなければ何もしない
    pub fn delete(&self, key: &str) -> Result<bool, InfraError> {
        validate(key)?;
        self.remove_entry(key)
    }

    /// 名前空間内のすべてのエントリを削除する
    pub fn clear(&self) -> Result<(), InfraError> {
        match fs::remove_dir_all(&self.base) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(InfraError::io(&self.base, e)),
        }
    }

    /// 指定したタグのいずれかが付いたエントリをすべて削除する
    ///
    /// 削除したエントリ数を返す。
    pub fn invalidate_tags(&self, tags: &[&str]) -> Result<usize, InfraError> {
        let mut removed = 0;
        for tag in tags {
            validate(tag)?;
            let dir = self.tag_dir(tag);
            for hash in list_file_names(&dir)? {
                // 参照が残っていても、現在のエントリがタグを持たなければ対象外
                let Some(entry) = self.load(&self.item_path(&hash))? else {
                    continue;
                };
                if entry.tags.iter().any(|t| t == tag) && self.remove_entry(&entry.key)? {
                    removed += 1;
                }
            }
            match fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(InfraError::io(&dir, e)),
            }
        }
        tracing::debug!(namespace = %self.namespace, ?tags, removed, "タグを無効化しました");
        Ok(removed)
    }

    fn item_path(&self, hash: &str) -> PathBuf {
        self.base.join("items").join(&hash[..2]).join(hash)
    }

    fn tag_dir(&self, tag: &str) -> PathBuf {
        self.base.join("tags").join(digest(tag))
    }

    /// 有効なエントリを読む。期限切れ・破損したエントリは削除して `None` を返す
    fn read_entry(&self, key: &str) -> Result<Option<Entry>, InfraError> {
        let path = self.item_path(&digest(key));
        let Some(entry) = self.load(&path)? else {
            return Ok(None);
        };
        if entry.key != key || entry.is_expired(self.clock.now()) {
            self.remove_entry(key)?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    fn load(&self, path: &Path) -> Result<Option<Entry>, InfraError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(InfraError::io(path, e)),
        };
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "破損したキャッシュエントリを削除します");
                remove_file_if_exists(path)?;
                Ok(None)
            }
        }
    }

    /// エントリ本体とタグの参照を削除する
    fn remove_entry(&self, key: &str) -> Result<bool, InfraError> {
        let hash = digest(key);
        let path = self.item_path(&hash);
        if let Some(entry) = self.load(&path)? {
            for tag in &entry.tags {
                remove_file_if_exists(&self.tag_dir(tag).join(&hash))?;
            }
        }
        remove_file_if_exists(&path)
    }
}

impl Pruneable for FilesystemTagAwareCache {
    #[tracing::instrument(skip_all, fields(namespace = %self.namespace), err)]
    fn prune(&self) -> Result<usize, InfraError> {
        let now = self.clock.now();
        let items = self.base.join("items");
        let mut pruned = 0;

        for shard in list_file_names(&items)? {
            let shard_dir = items.join(&shard);
            for hash in list_file_names(&shard_dir)? {
                let path = shard_dir.join(&hash);
                let Some(entry) = self.load(&path)? else {
                    continue;
                };
                if entry.is_expired(now) && self.remove_entry(&entry.key)? {
                    pruned += 1;
                }
            }
        }

        tracing::debug!(pruned, "期限切れのエントリを削除しました");
        Ok(pruned)
    }
}

fn validate(key: &str) -> Result<(), InfraError> {
    if key.is_empty() || key.contains(|c: char| RESERVED_CHARACTERS.contains(c)) {
        return Err(InfraError::invalid_cache_key(key));
    }
    Ok(())
}

fn digest(s: &str) -> String {
    hex::encode(Sha256::digest(s.as_bytes()))
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), InfraError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| InfraError::io(parent, e))?;
    let mut tmp = tempfile::Builder::new()
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|e| InfraError::io(parent, e))?;
    tmp.write_all(contents)
        .map_err(|e| InfraError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| InfraError::io(path, e.error))?;
    Ok(())
}

fn remove_file_if_exists(path: &Path) -> Result<bool, InfraError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(InfraError::io(path, e)),
    }
}

/// ディレクトリ直下のファイル名一覧。ディレクトリがなければ空
fn list_file_names(dir: &Path) -> Result<Vec<String>, InfraError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(InfraError::io(dir, e)),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| InfraError::io(dir, e))?;
        if let Some(name) = entry.file_name().to_str()
            && !name.ends_with(".tmp")
        {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

// =============================================================================
// CacheRegistry
// =============================================================================

/// 名前付きキャッシュプールのレジストリ
#[derive(Debug, Clone, Default)]
pub struct CacheRegistry {
    pools: BTreeMap<String, Arc<FilesystemTagAwareCache>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// プールを登録する。同名のプールは置き換える
    pub fn register(
        &mut self,
        name: impl Into<String>,
        cache: FilesystemTagAwareCache,
    ) -> &mut Self {
        self.pools.insert(name.into(), Arc::new(cache));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<FilesystemTagAwareCache>> {
        self.pools.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    /// 登録済みのすべてのプールから期限切れエントリを削除する
    pub fn prune_all(&self) -> Result<usize, InfraError> {
        let mut total = 0;
        for pool in self.pools.values() {
            total += pool.prune()?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pixiekat_domain::FixedClock;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;
    use crate::error::InfraErrorKind;

    fn setup(lifetime: Duration) -> (TempDir, Arc<FixedClock>, FilesystemTagAwareCache) {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        ));
        let cache = FilesystemTagAwareCache::new("app", lifetime, dir.path())
            .unwrap()
            .with_clock(clock.clone());
        (dir, clock, cache)
    }

    #[test]
    fn test_保存した値を取得できる() {
        let (_dir, _clock, sut) = setup(Duration::from_secs(3600));

        sut.set("greeting", &"hello".to_string()).unwrap();

        assert_eq!(sut.get::<String>("greeting").unwrap().as_deref(), Some("hello"));
        assert!(sut.has("greeting").unwrap());
        assert_eq!(sut.get::<String>("unknown").unwrap(), None);
    }

    #[test]
    fn test_既定の有効期限を過ぎるとミスになる() {
        let (_dir, clock, sut) = setup(Duration::from_secs(60));
        sut.set("k", &1).unwrap();

        clock.advance(chrono::Duration::seconds(59));
        assert!(sut.has("k").unwrap());

        clock.advance(chrono::Duration::seconds(1));
        assert!(!sut.has("k").unwrap());
    }

    #[test]
    fn test_有効期限ゼロは期限切れにならない() {
        let (_dir, clock, sut) = setup(Duration::ZERO);
        sut.set("k", &1).unwrap();

        clock.advance(chrono::Duration::days(3650));

        assert_eq!(sut.get::<i32>("k").unwrap(), Some(1));
    }

    #[test]
    fn test_タグで一括無効化できる() {
        let (_dir, _clock, sut) = setup(Duration::ZERO);
        sut.set_with("post-1", &"a", None, &["posts"]).unwrap();
        sut.set_with("post-2", &"b", None, &["posts", "featured"]).unwrap();
        sut.set_with("user-1", &"c", None, &["users"]).unwrap();

        let removed = sut.invalidate_tags(&["posts"]).unwrap();

        assert_eq!(removed, 2);
        assert!(!sut.has("post-1").unwrap());
        assert!(!sut.has("post-2").unwrap());
        assert!(sut.has("user-1").unwrap());
    }

    #[test]
    fn test_上書き保存で古いタグが外れる() {
        let (_dir, _clock, sut) = setup(Duration::ZERO);
        sut.set_with("k", &1, None, &["old"]).unwrap();
        sut.set_with("k", &2, None, &["new"]).unwrap();

        sut.invalidate_tags(&["old"]).unwrap();

        assert_eq!(sut.get::<i32>("k").unwrap(), Some(2));
    }

    #[test]
    fn test_無効化したタグの参照が再保存したエントリを消さない() {
        let (_dir, _clock, sut) = setup(Duration::ZERO);
        sut.set_with("post-2", &"old", None, &["posts", "featured"]).unwrap();
        sut.invalidate_tags(&["posts"]).unwrap();
        sut.set("post-2", &"fresh").unwrap();

        let removed = sut.invalidate_tags(&["featured"]).unwrap();

        assert_eq!(removed, 0);
        assert_eq!(sut.get::<String>("post-2").unwrap().as_deref(), Some("fresh"));
    }

    #[test]
    fn test_複数タグを持つエントリは一度だけ数える() {
        let (_dir, _clock, sut) = setup(Duration::ZERO);
        sut.set_with("post-1", &"a", None, &["posts", "featured"]).unwrap();

        let removed = sut.invalidate_tags(&["posts", "featured"]).unwrap();

        assert_eq!(removed, 1);
        assert!(!sut.has("post-1").unwrap());
    }

    #[test]
    fn test_同じキーへの並行書き込みは失敗しない() {
        let (_dir, _clock, sut) = setup(Duration::ZERO);

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|worker| {
                    let sut = &sut;
                    scope.spawn(move || {
                        (0..100)
                            .filter(|i| sut.set("shared", &(worker * 1000 + i)).is_err())
                            .count()
                    })
                })
                .collect();
            let errors: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
            assert_eq!(errors, 0);
        });

        assert!(sut.get::<i32>("shared").unwrap().is_some());
        let shard = sut.item_path(&digest("shared"));
        let leftovers = list_file_names(shard.parent().unwrap()).unwrap();
        assert_eq!(leftovers, vec![digest("shared")]);
    }

    #[test]
    fn test_deleteとclear() {
        let (_dir, _clock, sut) = setup(Duration::ZERO);
        sut.set("a", &1).unwrap();
        sut.set("b", &2).unwrap();

        assert!(sut.delete("a").unwrap());
        assert!(!sut.delete("a").unwrap());
        assert!(sut.has("b").unwrap());

        sut.clear().unwrap();
        assert!(!sut.has("b").unwrap());
        assert!(!sut.directory().exists());
    }

    #[test]
    fn test_pruneは期限切れのエントリだけを削除する() {
        let (_dir, clock, sut) = setup(Duration::from_secs(60));
        sut.set("short", &1).unwrap();
        sut.set_with("long", &2, Some(Duration::from_secs(600)), &[]).unwrap();

        clock.advance(chrono::Duration::seconds(120));

        assert_eq!(sut.prune().unwrap(), 1);
        assert_eq!(sut.get::<i32>("long").unwrap(), Some(2));
    }

    #[test]
    fn test_get_or_insert_withはミスのときだけ初期化する() {
        let (_dir, _clock, sut) = setup(Duration::ZERO);
        let mut calls = 0;

        let first: i32 = sut
            .get_or_insert_with("answer", || {
                calls += 1;
                42
            })
            .unwrap();
        let second: i32 = sut.get_or_insert_with("answer", || 0).unwrap();

        assert_eq!((first, second, calls), (42, 42, 1));
    }

    #[rstest]
    #[case("")]
    #[case("a/b")]
    #[case("user@host")]
    #[case("ns:key")]
    #[case("{x}")]
    #[case("back\\slash")]
    fn test_予約文字を含むキーは拒否される(#[case] key: &str) {
        let (_dir, _clock, sut) = setup(Duration::ZERO);

        let err = sut.set(key, &1).unwrap_err();

        assert!(matches!(err.kind(), InfraErrorKind::InvalidCacheKey(_)));
    }

    #[test]
    fn test_破損したエントリはミスとして扱う() {
        let (_dir, _clock, sut) = setup(Duration::ZERO);
        sut.set("k", &1).unwrap();
        fs::write(sut.item_path(&digest("k")), b"{not json").unwrap();

        assert_eq!(sut.get::<i32>("k").unwrap(), None);
    }

    #[test]
    fn test_レジストリは名前でプールを引ける() {
        let (_dir, clock, cache) = setup(Duration::from_secs(1));
        cache.set("k", &1).unwrap();
        let mut sut = CacheRegistry::new();
        sut.register("app", cache);

        assert!(sut.get("app").is_some());
        assert!(sut.get("missing").is_none());
        assert_eq!(sut.names().collect::<Vec<_>>(), vec!["app"]);

        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(sut.prune_all().unwrap(), 1);
    }
}
