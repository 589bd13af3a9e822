use std::fs;
use std::path::{Path, PathBuf};

const DB_PREFIX: &str = "worker_";
const DB_SUFFIX: &str = ".db";

pub fn db_file_name(worker: &str) -> String {
    format!("{DB_PREFIX}{worker}{DB_SUFFIX}")
}

fn worker_name_of(file_name: &str) -> Option<&str> {
    let lower = file_name.to_ascii_lowercase();
    if lower.len() <= DB_PREFIX.len() + DB_SUFFIX.len()
        || !lower.starts_with(DB_PREFIX)
        || !lower.ends_with(DB_SUFFIX)
    {
        return None;
    }
    Some(&file_name[DB_PREFIX.len()..file_name.len() - DB_SUFFIX.len()])
}

/// `worker_<name>.db` files under `dir`, sorted by worker name.
pub fn list_worker_dbs(dir: &Path) -> Vec<(String, PathBuf)> {
    let Ok(read) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut found = read
        .flatten()
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| {
            let file_name = entry.file_name().to_str()?.to_string();
            let worker = worker_name_of(&file_name)?.to_string();
            Some((worker, entry.path()))
        })
        .collect::<Vec<_>>();
    found.sort();
    found
}

/// Case-insensitive lookup of `worker_<name>.db`.
pub fn find_worker_db(dir: &Path, worker: &str) -> Option<PathBuf> {
    let exact = dir.join(db_file_name(worker));
    if exact.is_file() {
        return Some(exact);
    }
    list_worker_dbs(dir)
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(worker))
        .map(|(_, path)| path)
}

pub fn worker_db_path(dir: &Path, worker: &str) -> PathBuf {
    find_worker_db(dir, worker).unwrap_or_else(|| dir.join(db_file_name(worker)))
}
