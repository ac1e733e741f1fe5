use super::{CounterTable, Entry};
use std::fmt;
use std::io::{self, Write};

/// One line of the interval histogram.
///
/// Rendered as `"{key:08x}: {count}, {depth}"`, for example `0000abcd: 1, 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportLine {
    pub key: u64,
    pub count: u64,
    /// Level of the entry in a balanced search tree over the interval's keys.
    /// Diagnostic only.
    pub depth: u32,
}

impl ReportLine {
    pub fn new(entry: Entry, depth: u32) -> Self {
        Self {
            key: entry.key,
            count: entry.count,
            depth,
        }
    }
}

impl fmt::Display for ReportLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}: {}, {}", self.key, self.count, self.depth)
    }
}

/// Write every entry of `table` to `out`, one line per key in ascending order.
///
/// Returns the number of lines written. The table is not modified.
pub fn write_report<W: Write + ?Sized>(table: &CounterTable, out: &mut W) -> io::Result<usize> {
    let mut written = 0;
    for line in table.report() {
        writeln!(out, "{line}")?;
        written += 1;
    }
    out.flush()?;
    Ok(written)
}

/// Level (root = 0) of the `index`-th smallest of `len` sorted keys in a
/// perfectly balanced binary search tree built by repeated midpoint splits.
pub(super) fn balanced_depth(index: usize, len: usize) -> u32 {
    let (mut lo, mut hi) = (0usize, len);
    let mut depth = 0;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if index == mid {
            break;
        }
        if index < mid {
            hi = mid;
        } else {
            lo = mid + 1;
        }
        depth += 1;
    }
    depth
}
