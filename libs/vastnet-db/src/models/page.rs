use serde::Serialize;

pub const DEFAULT_PER_PAGE: i64 = 10;
pub const MAX_PER_PAGE: i64 = 100;

/// One page of an admin listing. Pages are 1-based.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

impl<T> Page<T> {
    /// Clamps a requested page/size into `(page, per_page, offset)`.
    pub fn window(page: i64, per_page: i64) -> (i64, i64, i64) {
        let page = page.max(1);
        let per_page = if (1..=MAX_PER_PAGE).contains(&per_page) {
            per_page
        } else {
            DEFAULT_PER_PAGE
        };
        (page, per_page, (page - 1).saturating_mul(per_page))
    }

    pub fn total_pages(&self) -> i64 {
        if self.total == 0 {
            1
        } else {
            (self.total + self.per_page - 1) / self.per_page
        }
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_clamps_bad_input() {
        assert_eq!(Page::<()>::window(0, 0), (1, DEFAULT_PER_PAGE, 0));
        assert_eq!(Page::<()>::window(3, 5), (3, 5, 10));
        assert_eq!(Page::<()>::window(2, 500), (2, DEFAULT_PER_PAGE, 10));
        assert_eq!(Page::<()>::window(i64::MAX, 100), (i64::MAX, 100, i64::MAX));
    }

    #[test]
    fn total_pages_rounds_up() {
        let page = Page { items: vec![1, 2], page: 1, per_page: 2, total: 5 };
        assert_eq!(page.total_pages(), 3);
        assert!(page.has_next());
        assert!(!page.has_prev());

        let empty: Page<i32> = Page { items: vec![], page: 1, per_page: 10, total: 0 };
        assert_eq!(empty.total_pages(), 1);
        assert!(!empty.has_next());
    }
}
