use std::collections::{BTreeSet, HashMap};

use crate::models::{StockItem, VideoRecord};
use crate::reconcile::{normalize_plate, ReconciliationJoin};

/// PlateIndex answers the reconciliation join with one pass over the video titles
/// instead of testing every plate against every title.
///
/// Known plates are keyed by their normalized text. Each title is scanned once and
/// every window whose length equals some plate length is looked up. A plate occurs
/// in a title exactly when one of those windows equals it, so the result is the
/// same as the substring rule in `reconcile::join`.
pub struct PlateIndex {
    /// normalized plate -> positions in the stock snapshot
    plates: HashMap<String, Vec<usize>>,
    /// distinct plate lengths, in chars
    lengths: BTreeSet<usize>,
}

impl PlateIndex {
    /// Build the lookup side from a stock snapshot.
    pub fn build(stock: &[StockItem]) -> Self {
        let mut plates: HashMap<String, Vec<usize>> = HashMap::new();
        let mut lengths = BTreeSet::new();
        for (pos, item) in stock.iter().enumerate() {
            let plate = normalize_plate(&item.registration_plate);
            lengths.insert(plate.chars().count());
            plates.entry(plate).or_default().push(pos);
        }
        Self { plates, lengths }
    }

    /// Normalized plate -> matching video positions, in snapshot order.
    fn scan(&self, videos: &[VideoRecord]) -> HashMap<&str, Vec<usize>> {
        let mut hits: HashMap<&str, Vec<usize>> = HashMap::new();
        for (vpos, video) in videos.iter().enumerate() {
            let title = normalize_plate(&video.title);
            // Byte offset of every char start, plus the end.
            let bounds: Vec<usize> = title
                .char_indices()
                .map(|(i, _)| i)
                .chain(std::iter::once(title.len()))
                .collect();
            for start in 0..bounds.len() {
                for &len in &self.lengths {
                    let Some(&end) = bounds.get(start + len) else {
                        break;
                    };
                    if let Some((plate, _)) = self.plates.get_key_value(&title[bounds[start]..end]) {
                        let list = hits.entry(plate.as_str()).or_default();
                        if list.last() != Some(&vpos) {
                            list.push(vpos);
                        }
                    }
                }
            }
        }
        hits
    }

    /// Join the snapshot this index was built from against `videos`.
    pub fn join(&self, stock: &[StockItem], videos: &[VideoRecord]) -> ReconciliationJoin {
        let hits = self.scan(videos);
        let mut by_stock: HashMap<String, Vec<VideoRecord>> = HashMap::with_capacity(stock.len());
        for item in stock {
            let plate = normalize_plate(&item.registration_plate);
            by_stock.entry(item.id.clone()).or_insert_with(|| {
                hits.get(plate.as_str())
                    .map(|positions| positions.iter().map(|&p| videos[p].clone()).collect())
                    .unwrap_or_default()
            });
        }
        ReconciliationJoin::from_map(by_stock)
    }
}
