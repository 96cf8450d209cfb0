use dbt_core::{Directory, GuestPc};

/// Decides when interpretation gives way to native compilation.
///
/// Owns only the promotion threshold; the hotness counter itself
/// lives in the directory entry so it survives across calls without
/// a side table.
pub struct HotnessPromoter {
    hot_count: u16,
}

impl HotnessPromoter {
    pub fn new(hot_count: u16) -> Self {
        Self { hot_count }
    }

    /// Record one interpreted visit to `pc` and report whether it has
    /// crossed the promotion threshold.
    ///
    /// Creates the directory entry on first visit. The H-th visit is
    /// the one that returns `true`.
    pub fn is_hot(&self, directory: &mut Directory, pc: GuestPc, now: u64) -> bool {
        directory.touch(pc, self.hot_count, now) >= self.hot_count
    }

    pub fn threshold(&self) -> u16 {
        self.hot_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn directory() -> Directory {
        let dir = tempdir().unwrap();
        Directory::new(&dir.path().join("cache_file"), 64 * 1024, 64).unwrap()
    }

    #[test]
    fn promotes_on_the_hth_visit() {
        let promoter = HotnessPromoter::new(4);
        let mut d = directory();
        for n in 0..3u64 {
            assert!(!promoter.is_hot(&mut d, 0x2000, n));
        }
        assert!(promoter.is_hot(&mut d, 0x2000, 3));
    }

    #[test]
    fn saturates_past_threshold() {
        let promoter = HotnessPromoter::new(2);
        let mut d = directory();
        assert!(!promoter.is_hot(&mut d, 0x2000, 0));
        assert!(promoter.is_hot(&mut d, 0x2000, 1));
        assert!(promoter.is_hot(&mut d, 0x2000, 2));
        assert_eq!(d.entry(d.lookup(0x2000, 0).unwrap().0).hot, 2);
    }

    #[test]
    fn distinct_pcs_are_independent() {
        let promoter = HotnessPromoter::new(2);
        let mut d = directory();
        assert!(!promoter.is_hot(&mut d, 0x2000, 0));
        assert!(promoter.is_hot(&mut d, 0x2000, 1));
        // 0x2000 is already hot, but 0x3000 has never been visited, so
        // its own first visit must still report not-yet-hot.
        assert!(!promoter.is_hot(&mut d, 0x3000, 2));
    }

    #[test]
    #[should_panic(expected = "pc 0 is reserved")]
    fn rejects_pc_zero() {
        let promoter = HotnessPromoter::new(4);
        let mut d = directory();
        promoter.is_hot(&mut d, 0, 0);
    }
}
