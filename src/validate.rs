//! Path validation ahead of analysis work.
//!
//! User-supplied paths are checked before any expensive work is queued:
//! normalization, traversal containment, and optional stat/permission
//! probes. Malformed input never produces an `Err` - problems land in the
//! returned result with stable codes so calling layers can render
//! actionable messages.

use phf::phf_set;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Platform path-length ceiling applied unless overridden.
pub const DEFAULT_MAX_PATH_LENGTH: usize = 4096;

/// Conservative budget for stat calls.
pub const DEFAULT_STAT_TIMEOUT: Duration = Duration::from_secs(5);

/// Device names Windows reserves regardless of extension. Flagged as a
/// warning, not an error, since the check also runs on POSIX hosts.
static RESERVED_DEVICE_NAMES: phf::Set<&'static str> = phf_set! {
    "CON", "PRN", "AUX", "NUL",
    "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8", "COM9",
    "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
};

/// What to check and how hard to try.
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    /// Stat the path and classify file vs directory.
    pub check_existence: bool,
    /// Probe readability and report the readonly flag.
    pub check_permissions: bool,
    /// Reject traversal escapes and null bytes.
    pub security_checks: bool,
    /// Containment root; relative inputs are resolved against it.
    pub base_path: Option<PathBuf>,
    /// Budget for each filesystem probe.
    pub timeout: Duration,
    /// Refuse symlinked targets when false.
    pub allow_symlinks: bool,
    pub max_path_length: usize,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            check_existence: true,
            check_permissions: false,
            security_checks: true,
            base_path: None,
            timeout: DEFAULT_STAT_TIMEOUT,
            allow_symlinks: true,
            max_path_length: DEFAULT_MAX_PATH_LENGTH,
        }
    }
}

/// Stable issue codes for validation errors and warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    // Errors
    EmptyPath,
    PathTooLong,
    NullByte,
    PathTraversal,
    SymlinkDenied,
    NotFound,
    PermissionDenied,
    StatTimeout,
    OperationCancelled,
    // Warnings
    TrailingDotOrSpace,
    ConsecutiveSeparators,
    ReservedDeviceName,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCode::EmptyPath => "EMPTY_PATH",
            ValidationCode::PathTooLong => "PATH_TOO_LONG",
            ValidationCode::NullByte => "NULL_BYTE",
            ValidationCode::PathTraversal => "PATH_TRAVERSAL",
            ValidationCode::SymlinkDenied => "SYMLINK_DENIED",
            ValidationCode::NotFound => "NOT_FOUND",
            ValidationCode::PermissionDenied => "PERMISSION_DENIED",
            ValidationCode::StatTimeout => "STAT_TIMEOUT",
            ValidationCode::OperationCancelled => "OPERATION_CANCELLED",
            ValidationCode::TrailingDotOrSpace => "TRAILING_DOT_OR_SPACE",
            ValidationCode::ConsecutiveSeparators => "CONSECUTIVE_SEPARATORS",
            ValidationCode::ReservedDeviceName => "RESERVED_DEVICE_NAME",
        }
    }
}

/// A single error or warning attached to a validation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: ValidationCode,
    pub message: String,
}

impl ValidationIssue {
    fn new(code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Filesystem facts gathered when existence/permission checks run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMetadata {
    pub exists: bool,
    pub is_directory: bool,
    pub is_file: bool,
    pub readonly: Option<bool>,
    pub size_bytes: Option<u64>,
}

/// Outcome of validating one path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub normalized_path: Option<PathBuf>,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub metadata: PathMetadata,
}

impl ValidationResult {
    fn rejected(issue: ValidationIssue) -> Self {
        Self {
            is_valid: false,
            normalized_path: None,
            errors: vec![issue],
            warnings: Vec::new(),
            metadata: PathMetadata::default(),
        }
    }

    fn cancelled() -> Self {
        Self::rejected(ValidationIssue::new(
            ValidationCode::OperationCancelled,
            "validation was cancelled before completion",
        ))
    }

    /// First error code, if any.
    pub fn error_code(&self) -> Option<ValidationCode> {
        self.errors.first().map(|e| e.code)
    }
}

/// Validates user-supplied paths. Stateless; one instance can be shared
/// freely.
#[derive(Debug, Clone, Default)]
pub struct PathValidator;

impl PathValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate without an external abort signal.
    pub async fn validate(&self, raw: &str, options: &ValidationOptions) -> ValidationResult {
        self.validate_with_cancel(raw, options, &CancellationToken::new())
            .await
    }

    /// Validate, stopping promptly if `cancel` fires. A cancelled
    /// validation reports a single `OPERATION_CANCELLED` error rather
    /// than a partial result.
    pub async fn validate_with_cancel(
        &self,
        raw: &str,
        options: &ValidationOptions,
        cancel: &CancellationToken,
    ) -> ValidationResult {
        if cancel.is_cancelled() {
            return ValidationResult::cancelled();
        }

        if raw.trim().is_empty() {
            return ValidationResult::rejected(ValidationIssue::new(
                ValidationCode::EmptyPath,
                "path is empty or whitespace-only",
            ));
        }
        if raw.len() > options.max_path_length {
            return ValidationResult::rejected(ValidationIssue::new(
                ValidationCode::PathTooLong,
                format!(
                    "path length {} exceeds the limit of {}",
                    raw.len(),
                    options.max_path_length
                ),
            ));
        }
        if options.security_checks && raw.contains('\0') {
            return ValidationResult::rejected(ValidationIssue::new(
                ValidationCode::NullByte,
                "path contains a null byte",
            ));
        }

        let mut errors = Vec::new();
        let warnings = collect_warnings(raw);

        let normalized = normalize_path(raw, options.base_path.as_deref());

        if options.security_checks {
            if let Some(base) = &options.base_path {
                let base = normalize_path(&base.to_string_lossy(), None);
                if !normalized.starts_with(&base) {
                    errors.push(ValidationIssue::new(
                        ValidationCode::PathTraversal,
                        format!(
                            "path resolves outside of {}",
                            base.display()
                        ),
                    ));
                }
            }
        }

        let mut metadata = PathMetadata::default();
        if errors.is_empty() && options.check_existence {
            match self
                .stat_with_budget(&normalized, options, cancel)
                .await
            {
                StatOutcome::Cancelled => return ValidationResult::cancelled(),
                StatOutcome::Issue(issue) => errors.push(issue),
                StatOutcome::Found(found) => metadata = found,
            }
        }

        if errors.is_empty() && options.check_permissions && metadata.exists {
            if let Some(issue) = self.probe_permissions(&normalized, &metadata, cancel).await {
                if issue.code == ValidationCode::OperationCancelled {
                    return ValidationResult::cancelled();
                }
                errors.push(issue);
            }
        }

        ValidationResult {
            is_valid: errors.is_empty(),
            normalized_path: Some(normalized),
            errors,
            warnings,
            metadata,
        }
    }

    async fn stat_with_budget(
        &self,
        path: &Path,
        options: &ValidationOptions,
        cancel: &CancellationToken,
    ) -> StatOutcome {
        let stat = async {
            if options.allow_symlinks {
                match tokio::fs::metadata(path).await {
                    Ok(meta) => RawStat::Meta(meta),
                    Err(err) => RawStat::Io(err),
                }
            } else {
                // Probe the link itself so a symlinked target is refused
                // instead of silently followed.
                match tokio::fs::symlink_metadata(path).await {
                    Ok(meta) if meta.file_type().is_symlink() => RawStat::Symlink,
                    Ok(meta) => RawStat::Meta(meta),
                    Err(err) => RawStat::Io(err),
                }
            }
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return StatOutcome::Cancelled,
            outcome = tokio::time::timeout(options.timeout, stat) => outcome,
        };

        match outcome {
            Err(_) => StatOutcome::Issue(ValidationIssue::new(
                ValidationCode::StatTimeout,
                format!("stat did not finish within {}ms", options.timeout.as_millis()),
            )),
            Ok(RawStat::Meta(meta)) => StatOutcome::Found(PathMetadata {
                exists: true,
                is_directory: meta.is_dir(),
                is_file: meta.is_file(),
                readonly: Some(meta.permissions().readonly()),
                size_bytes: meta.is_file().then(|| meta.len()),
            }),
            Ok(RawStat::Symlink) => StatOutcome::Issue(ValidationIssue::new(
                ValidationCode::SymlinkDenied,
                format!(
                    "{} is a symlink and symlinks are not allowed",
                    path.display()
                ),
            )),
            Ok(RawStat::Io(err)) => StatOutcome::Issue(classify_stat_error(path, &err)),
        }
    }

    async fn probe_permissions(
        &self,
        path: &Path,
        metadata: &PathMetadata,
        cancel: &CancellationToken,
    ) -> Option<ValidationIssue> {
        let probe = async {
            if metadata.is_directory {
                tokio::fs::read_dir(path).await.map(|_| ())
            } else {
                tokio::fs::File::open(path).await.map(|_| ())
            }
        };
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                return Some(ValidationIssue::new(
                    ValidationCode::OperationCancelled,
                    "validation was cancelled before completion",
                ));
            }
            result = probe => result,
        };
        match result {
            Ok(()) => None,
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                Some(ValidationIssue::new(
                    ValidationCode::PermissionDenied,
                    format!("read access to {} was denied", path.display()),
                ))
            }
            Err(_) => None,
        }
    }
}

enum StatOutcome {
    Found(PathMetadata),
    Issue(ValidationIssue),
    Cancelled,
}

enum RawStat {
    Meta(std::fs::Metadata),
    Symlink,
    Io(std::io::Error),
}

fn classify_stat_error(path: &Path, err: &std::io::Error) -> ValidationIssue {
    match err.kind() {
        std::io::ErrorKind::NotFound => ValidationIssue::new(
            ValidationCode::NotFound,
            format!("{} does not exist", path.display()),
        ),
        std::io::ErrorKind::PermissionDenied => ValidationIssue::new(
            ValidationCode::PermissionDenied,
            format!("access to {} was denied", path.display()),
        ),
        _ => ValidationIssue::new(
            ValidationCode::NotFound,
            format!("cannot stat {}: {}", path.display(), err),
        ),
    }
}

/// Non-fatal oddities worth surfacing without failing validation.
fn collect_warnings(raw: &str) -> Vec<ValidationIssue> {
    let mut warnings = Vec::new();

    if raw.contains("//") || raw.contains("\\\\") {
        warnings.push(ValidationIssue::new(
            ValidationCode::ConsecutiveSeparators,
            "path contains consecutive separators",
        ));
    }

    let last = raw
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("");
    if last.ends_with('.') || last.ends_with(' ') {
        warnings.push(ValidationIssue::new(
            ValidationCode::TrailingDotOrSpace,
            "final path component ends with a dot or space",
        ));
    }
    let stem = last.split('.').next().unwrap_or("");
    if RESERVED_DEVICE_NAMES.contains(stem.to_ascii_uppercase().as_str()) {
        warnings.push(ValidationIssue::new(
            ValidationCode::ReservedDeviceName,
            format!("{stem} is a reserved device name on Windows"),
        ));
    }

    warnings
}

/// Lexically resolve `.` and `..` segments, joining relative input onto
/// `base` when given. Purely textual - no filesystem access, so escapes
/// are detectable before anything is stat'ed.
fn normalize_path(raw: &str, base: Option<&Path>) -> PathBuf {
    let cleaned = raw.replace('\\', "/");
    let path = Path::new(&cleaned);
    let joined = match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    };

    let mut resolved = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::Prefix(prefix) => resolved.push(prefix.as_os_str()),
            Component::RootDir => resolved.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                // Past an absolute root there is nothing left to strip;
                // on a relative path the ".." is kept so containment
                // checks can see it.
                if !resolved.pop() && !resolved.has_root() {
                    resolved.push(Component::ParentDir.as_os_str());
                }
            }
            Component::Normal(part) => resolved.push(part),
        }
    }
    resolved
}
