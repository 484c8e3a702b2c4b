//! Choice of the files that become output streams.

use crate::config::SelectionPolicy;
use crate::engine::FileEntry;

/// Returns the indices of the files to stream under `policy`.
///
/// `Largest` yields exactly one file, the lowest index winning ties, and
/// nothing for an archive without files.
pub fn select(policy: SelectionPolicy, files: &[FileEntry]) -> Vec<usize> {
    match policy {
        SelectionPolicy::All => files.iter().map(|file| file.index).collect(),
        SelectionPolicy::Largest => files
            .iter()
            .fold(None::<&FileEntry>, |best, file| match best {
                Some(best) if best.size >= file.size => Some(best),
                _ => Some(file),
            })
            .map(|file| vec![file.index])
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(sizes: &[u64]) -> Vec<FileEntry> {
        let mut offset = 0;
        sizes
            .iter()
            .enumerate()
            .map(|(index, &size)| {
                let file = FileEntry {
                    index,
                    path: format!("{index}.bin"),
                    offset,
                    size,
                };
                offset += size;
                file
            })
            .collect()
    }

    #[test]
    fn test_all_selects_every_file() {
        assert_eq!(select(SelectionPolicy::All, &files(&[1, 2, 3])), vec![0, 1, 2]);
    }

    #[test]
    fn test_largest_tie_goes_to_lowest_index() {
        assert_eq!(
            select(SelectionPolicy::Largest, &files(&[100, 500, 500])),
            vec![1]
        );
    }

    #[test]
    fn test_largest_picks_exactly_one() {
        assert_eq!(select(SelectionPolicy::Largest, &files(&[7, 7, 7])), vec![0]);
        assert_eq!(select(SelectionPolicy::Largest, &files(&[1, 2, 30])), vec![2]);
        assert!(select(SelectionPolicy::Largest, &[]).is_empty());
    }
}
