use crate::service::Track;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Playlist composition category. Also the rotation order used when interleaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Favorites,
    Hits,
    Discovery,
    Wildcard,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Favorites,
        Category::Hits,
        Category::Discovery,
        Category::Wildcard,
    ];

    pub const fn index(self) -> usize {
        match self {
            Category::Favorites => 0,
            Category::Hits => 1,
            Category::Discovery => 2,
            Category::Wildcard => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Favorites => "favorites",
            Category::Hits => "hits",
            Category::Discovery => "discovery",
            Category::Wildcard => "wildcard",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candidate tracks grouped by category for one refresh cycle.
#[derive(Debug, Clone, Default)]
pub struct CategoryPools {
    pools: [Vec<Track>; 4],
}

impl CategoryPools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, category: Category, track: Track) {
        self.pools[category.index()].push(track);
    }

    pub fn extend(&mut self, category: Category, tracks: impl IntoIterator<Item = Track>) {
        self.pools[category.index()].extend(tracks);
    }

    pub fn get(&self, category: Category) -> &[Track] {
        &self.pools[category.index()]
    }

    pub fn len(&self, category: Category) -> usize {
        self.pools[category.index()].len()
    }

    pub fn total(&self) -> usize {
        self.pools.iter().map(Vec::len).sum()
    }

    /// Track ids per category, in rotation order.
    pub fn ids(&self) -> [Vec<String>; 4] {
        self.pools
            .each_ref()
            .map(|pool| pool.iter().map(|t| t.id.clone()).collect())
    }

    /// Drop repeated track ids, within a pool and across pools.
    /// Earlier categories in rotation order keep the track.
    pub fn dedup(&mut self) -> usize {
        let mut seen = HashSet::new();
        let mut removed = 0;
        for pool in self.pools.iter_mut() {
            let before = pool.len();
            pool.retain(|track| seen.insert(track.id.clone()));
            removed += before - pool.len();
        }
        removed
    }

    pub fn find(&self, track_id: &str) -> Option<(Category, &Track)> {
        Category::ALL.iter().find_map(|&category| {
            self.get(category)
                .iter()
                .find(|t| t.id == track_id)
                .map(|t| (category, t))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_order_matches_indices() {
        for (i, category) in Category::ALL.iter().enumerate() {
            assert_eq!(category.index(), i);
        }
        assert_eq!(Category::Wildcard.to_string(), "wildcard");
    }

    #[test]
    fn test_dedup_keeps_first_category() {
        let mut pools = CategoryPools::new();
        pools.push(Category::Favorites, Track::new("a", "A", "X"));
        pools.push(Category::Hits, Track::new("a", "A", "X"));
        pools.push(Category::Hits, Track::new("b", "B", "X"));
        pools.push(Category::Hits, Track::new("b", "B", "X"));
        pools.push(Category::Wildcard, Track::new("c", "C", "X"));

        assert_eq!(pools.dedup(), 2);
        assert_eq!(pools.len(Category::Favorites), 1);
        assert_eq!(pools.len(Category::Hits), 1);
        assert_eq!(pools.total(), 3);
        assert_eq!(pools.find("a").unwrap().0, Category::Favorites);
        assert_eq!(pools.ids()[Category::Wildcard.index()], vec!["c".to_string()]);
    }
}
