//! Utility functions for error handling
//!
//! File helpers that attach the path and purpose of an operation to IO errors.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::{FlowError, Result};

/// Safely open a file with rich error information
///
/// # Arguments
/// * `path` - The path to the file to open
/// * `purpose` - Why the file is being opened (for error context)
pub fn safe_open_file(path: &Path, purpose: &str) -> Result<fs::File> {
    if !path.is_file() {
        return Err(FlowError::io(
            path,
            format!("Expected a file for: {purpose}"),
            io::Error::new(io::ErrorKind::NotFound, "file not found"),
        ));
    }

    fs::File::open(path).map_err(|e| {
        let context = match e.kind() {
            io::ErrorKind::PermissionDenied => {
                "Permission denied - check file permissions".to_string()
            }
            _ => format!("Failed to open file for: {purpose}"),
        };
        FlowError::io(path, context, e)
    })
}

/// Check if a directory exists and is readable, with rich error information
pub fn validate_directory(path: &Path, purpose: &str) -> Result<()> {
    if !path.is_dir() {
        return Err(FlowError::io(
            path,
            format!("Expected a directory for: {purpose}"),
            io::Error::new(io::ErrorKind::NotFound, "directory not found"),
        ));
    }

    fs::read_dir(path).map(|_| ()).map_err(|e| {
        let context = match e.kind() {
            io::ErrorKind::PermissionDenied => {
                "Permission denied - check directory permissions".to_string()
            }
            _ => format!("Failed to access directory for: {purpose}"),
        };
        FlowError::io(path, context, e)
    })
}

/// Safely read a file to string with rich error information
pub fn safe_read_to_string(path: &Path, purpose: &str) -> Result<String> {
    let mut file = safe_open_file(path, purpose)?;

    let mut content = String::new();
    io::Read::read_to_string(&mut file, &mut content).map_err(|e| {
        let context = match e.kind() {
            io::ErrorKind::InvalidData => {
                "File contains invalid UTF-8 data - cannot read as text".to_string()
            }
            _ => format!("Failed to read file content for: {purpose}"),
        };
        FlowError::io(path, context, e)
    })?;

    Ok(content)
}

/// Create a directory (and parents) if it does not exist yet
pub fn ensure_directory(path: &Path, purpose: &str) -> Result<()> {
    fs::create_dir_all(path)
        .map_err(|e| FlowError::io(path, format!("Failed to create directory for: {purpose}"), e))
}
