//! Line matcher and three-way line merge.
//!
//! The matcher computes a longest common subsequence of lines between the
//! base and each derived side. The merger walks the three line streams
//! synchronously: segments common to all three pass through; a segment
//! changed on exactly one side adopts that side; a segment changed on both
//! sides passes through when the results agree and becomes a marker-
//! bracketed conflict block when they differ.
//!
//! Markers are the git-compatible seven-character form carrying the
//! revision names, each on its own line:
//!
//! ```text
//! <<<<<<< LEFT
//! left lines
//! =======
//! right lines
//! >>>>>>> RIGHT
//! ```

use std::collections::HashMap;

// ---------------------------------------------------------------------------
// LineMerge
// ---------------------------------------------------------------------------

/// Result of a three-way line merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineMerge {
    /// The merged byte stream, conflict blocks included.
    pub merged: String,
    /// Number of conflict blocks emitted.
    pub conflicts: usize,
}

impl LineMerge {
    /// `true` when no conflict block was emitted.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.conflicts == 0
    }
}

// ---------------------------------------------------------------------------
// Line matching
// ---------------------------------------------------------------------------

/// Longest common subsequence of two line slices, as index pairs in
/// strictly increasing order on both sides.
pub(crate) fn lcs(a: &[&str], b: &[&str]) -> Vec<(usize, usize)> {
    let (n, m) = (a.len(), b.len());
    let mut table = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if a[i] == b[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut pairs = Vec::with_capacity(table[0][0]);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}

// ---------------------------------------------------------------------------
// Three-way merge
// ---------------------------------------------------------------------------

/// Merge `left` and `right` against their common ancestor `base`.
///
/// `left_label` and `right_label` are the revision names written into the
/// conflict markers.
#[must_use]
pub fn merge_lines(
    base: &str,
    left: &str,
    right: &str,
    left_label: &str,
    right_label: &str,
) -> LineMerge {
    let base_lines = split_lines(base);
    let left_lines = split_lines(left);
    let right_lines = split_lines(right);

    let base_to_left: HashMap<usize, usize> =
        lcs(&base_lines, &left_lines).into_iter().collect();
    let base_to_right: HashMap<usize, usize> =
        lcs(&base_lines, &right_lines).into_iter().collect();

    let mut merged = String::with_capacity(left.len().max(right.len()));
    let mut conflicts = 0usize;
    let (mut i, mut j, mut k) = (0usize, 0usize, 0usize);

    loop {
        // Stable line: present in all three streams at the current cursor.
        if i < base_lines.len()
            && base_to_left.get(&i) == Some(&j)
            && base_to_right.get(&i) == Some(&k)
        {
            merged.push_str(base_lines[i]);
            i += 1;
            j += 1;
            k += 1;
            continue;
        }

        // Unstable chunk: everything up to the next line stable in both
        // derived revisions (or the stream ends).
        let mut sync = (base_lines.len(), left_lines.len(), right_lines.len());
        for i2 in i..base_lines.len() {
            if let (Some(&j2), Some(&k2)) = (base_to_left.get(&i2), base_to_right.get(&i2)) {
                sync = (i2, j2, k2);
                break;
            }
        }
        let (i2, j2, k2) = sync;
        if (i, j, k) == (i2, j2, k2) {
            break;
        }

        let base_seg = &base_lines[i..i2];
        let left_seg = &left_lines[j..j2];
        let right_seg = &right_lines[k..k2];

        if left_seg == base_seg {
            push_lines(&mut merged, right_seg);
        } else if right_seg == base_seg || left_seg == right_seg {
            push_lines(&mut merged, left_seg);
        } else {
            conflicts += 1;
            push_terminated(&mut merged, &format!("<<<<<<< {left_label}"));
            push_lines(&mut merged, left_seg);
            ensure_newline(&mut merged);
            push_terminated(&mut merged, "=======");
            push_lines(&mut merged, right_seg);
            ensure_newline(&mut merged);
            push_terminated(&mut merged, &format!(">>>>>>> {right_label}"));
        }
        (i, j, k) = (i2, j2, k2);
    }

    LineMerge { merged, conflicts }
}

/// Split into lines keeping the terminators, so unterminated final lines
/// survive a round-trip.
fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

fn push_lines(out: &mut String, lines: &[&str]) {
    for line in lines {
        out.push_str(line);
    }
}

/// Append a marker line, always newline-terminated.
fn push_terminated(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}

/// Guarantee the buffer ends at a line boundary before a marker follows.
fn ensure_newline(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}
