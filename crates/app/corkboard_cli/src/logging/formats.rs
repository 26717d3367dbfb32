use std::io::Write;

use flexi_logger::{DeferredNow, Record, style};

/// `LEVEL target: message`, level colored when the terminal supports it.
pub fn cli_format(
    w: &mut dyn Write,
    _now: &mut DeferredNow,
    record: &Record,
) -> Result<(), std::io::Error> {
    let level = record.level();
    write!(
        w,
        "{} {}: {}",
        style(level).paint(level.to_string()),
        record.target(),
        record.args()
    )
}
