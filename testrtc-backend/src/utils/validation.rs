use regex::Regex;
use std::sync::LazyLock;

static REPORT_FILENAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^testrtc-.*\.log$").expect("valid report filename pattern"));

static DOWNLOAD_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d?\d00)KB\.data$").expect("valid download file pattern"));

static OPAQUE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{32}$").expect("valid id pattern"));

/// Only log reports written by the test page may be stored or purged.
pub fn is_valid_report_filename(filename: &str) -> bool {
    REPORT_FILENAME.is_match(filename)
}

/// Parses `<NNN>KB.data` into a size in kilobytes.
pub fn parse_download_file_name(file_name: &str) -> Option<u32> {
    DOWNLOAD_FILE
        .captures(file_name)
        .and_then(|caps| caps.get(1))
        .and_then(|size| size.as_str().parse().ok())
}

/// Upload ids and report keys are issued as 32 lowercase hex characters.
pub fn is_valid_id(id: &str) -> bool {
    OPAQUE_ID.is_match(id)
}
