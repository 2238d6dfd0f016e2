//! Persistence for the single in-flight "restart" GUID.
//!
//! Writes a single newline-terminated GUID to `<root_dir>/serclient.service`
//! so that, after a host-requested restart of the agent process, the next
//! run can still emit the final `Response` for the command that triggered
//! the restart.

use std::fs;
use std::io;
use std::path::Path;

/// Name of the marker file, relative to `root_dir`.
pub const MARKER_FILE_NAME: &str = "serclient.service";

/// Writes `guid` to the marker file under `root_dir`, creating or
/// truncating it as needed.
pub fn save(root_dir: impl AsRef<Path>, guid: &str) -> io::Result<()> {
    let path = root_dir.as_ref().join(MARKER_FILE_NAME);
    fs::write(path, format!("{guid}\n"))
}

/// Reads the GUID left by a previous [`save`] call, if any.
///
/// Returns `None` if the marker file does not exist or is empty; any other
/// I/O error is propagated.
pub fn load(root_dir: impl AsRef<Path>) -> io::Result<Option<String>> {
    let path = root_dir.as_ref().join(MARKER_FILE_NAME);
    match fs::read_to_string(path) {
        Ok(contents) => {
            let guid = contents.lines().next().unwrap_or("").trim();
            Ok(if guid.is_empty() {
                None
            } else {
                Some(guid.to_owned())
            })
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Removes the marker file, if present.
pub fn clear(root_dir: impl AsRef<Path>) -> io::Result<()> {
    let path = root_dir.as_ref().join(MARKER_FILE_NAME);
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
