use crate::session::{ConversationRecord, SCHEMA_VERSION};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("USERPROFILE").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn data_dir() -> PathBuf {
    home_dir().join(".campfire")
}

/// The fixed storage key: one conversation document per installation.
pub fn conversation_path() -> PathBuf {
    data_dir().join("conversation.json")
}

fn read_record_file(path: &Path) -> Result<ConversationRecord, String> {
    let data = fs::read(path).map_err(|err| format!("failed to read {}: {err}", path.display()))?;
    let record: ConversationRecord = serde_json::from_slice(&data)
        .map_err(|err| format!("failed to parse {}: {err}", path.display()))?;
    if record.schema_version != SCHEMA_VERSION {
        return Err(format!(
            "unknown schema_version in {}: {}",
            path.display(),
            record.schema_version
        ));
    }
    Ok(record)
}

pub fn ensure_data_dir() -> io::Result<PathBuf> {
    let dir = data_dir();
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Whole-document replacement via a temp file and rename, so a crash
/// mid-write never leaves a half-written conversation behind.
pub fn save(record: &ConversationRecord) -> io::Result<()> {
    let dir = ensure_data_dir()?;
    save_to(record, &dir.join("conversation.json"))
}

pub fn save_to(record: &ConversationRecord, final_path: &Path) -> io::Result<()> {
    let tmp_path = final_path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(record)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;

    fs::write(&tmp_path, bytes)?;
    match fs::rename(&tmp_path, final_path) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if final_path.exists() {
                fs::remove_file(final_path)?;
                fs::rename(&tmp_path, final_path)?;
                Ok(())
            } else {
                Err(rename_err)
            }
        }
    }
}

/// Loads the stored conversation. A missing file is a fresh start; any
/// failure degrades to an empty conversation plus a warning, never an
/// error to the caller.
pub fn load() -> (Option<ConversationRecord>, Option<String>) {
    load_from(&conversation_path())
}

pub fn load_from(path: &Path) -> (Option<ConversationRecord>, Option<String>) {
    if !path.exists() {
        return (None, None);
    }
    match read_record_file(path) {
        Ok(record) => (Some(record), None),
        Err(warning) => (None, Some(warning)),
    }
}

/// Discards the stored conversation (used by reset).
pub fn clear() -> io::Result<()> {
    let path = conversation_path();
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}
