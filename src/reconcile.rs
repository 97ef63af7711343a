//! Stock-to-video reconciliation.
//!
//! A video belongs to a stock item when the item's normalized plate occurs as a
//! substring of the video's normalized title. There is no structured key on the
//! video side, so this text rule is the join. It can produce false positives (one
//! plate contained in another, incidental text) and misses plates written with
//! separators other than whitespace; both are accepted as-is.
//!
//! Everything here is a pure function of its inputs. Joins are rebuilt from
//! scratch for every new pair of snapshots and never patched.

use std::collections::HashMap;

use reqwest::Url;

use crate::error::{PortalError, Result};
use crate::models::{Identity, StockItem, VideoRecord};

/// Strip all whitespace and upper-case. The only form ever compared.
pub fn normalize_plate(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Stock id to matching videos, each list in video snapshot order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationJoin {
    by_stock: HashMap<String, Vec<VideoRecord>>,
}

impl ReconciliationJoin {
    pub(crate) fn from_map(by_stock: HashMap<String, Vec<VideoRecord>>) -> Self {
        Self { by_stock }
    }

    pub fn matches(&self, stock_id: &str) -> &[VideoRecord] {
        self.by_stock
            .get(stock_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn video_ids(&self, stock_id: &str) -> Vec<&str> {
        self.matches(stock_id).iter().map(|v| v.id.as_str()).collect()
    }

    pub fn status(&self, stock_id: &str) -> VideoStatus {
        VideoStatus::from_count(self.matches(stock_id).len())
    }

    pub fn len(&self) -> usize {
        self.by_stock.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_stock.is_empty()
    }
}

/// Reference join: every stock plate tested against every title.
///
/// Duplicate stock ids keep the first item's matches.
pub fn join(stock: &[StockItem], videos: &[VideoRecord]) -> ReconciliationJoin {
    let titles: Vec<String> = videos.iter().map(|v| normalize_plate(&v.title)).collect();
    let mut by_stock = HashMap::with_capacity(stock.len());
    for item in stock {
        let plate = normalize_plate(&item.registration_plate);
        by_stock.entry(item.id.clone()).or_insert_with(|| {
            videos
                .iter()
                .zip(&titles)
                .filter(|(_, title)| title.contains(plate.as_str()))
                .map(|(video, _)| video.clone())
                .collect()
        });
    }
    ReconciliationJoin { by_stock }
}

/// Drives which actions a row offers: upload, direct links, or a disclosure list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoStatus {
    NoVideo,
    Single,
    Multiple(usize),
}

impl VideoStatus {
    pub fn from_count(count: usize) -> Self {
        match count {
            0 => VideoStatus::NoVideo,
            1 => VideoStatus::Single,
            n => VideoStatus::Multiple(n),
        }
    }

    pub fn has_video(self) -> bool {
        self != VideoStatus::NoVideo
    }

    pub fn label(self) -> String {
        match self {
            VideoStatus::NoVideo => "No Video".to_string(),
            VideoStatus::Single => "Has Video".to_string(),
            VideoStatus::Multiple(n) => format!("{n} Videos"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VideoFilter {
    #[default]
    All,
    HasVideo,
    NoVideo,
}

impl VideoFilter {
    fn admits(self, status: VideoStatus) -> bool {
        match self {
            VideoFilter::All => true,
            VideoFilter::HasVideo => status.has_video(),
            VideoFilter::NoVideo => !status.has_video(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockQuery {
    pub search: String,
    pub filter: VideoFilter,
}

impl StockQuery {
    pub fn new(search: impl Into<String>, filter: VideoFilter) -> Self {
        Self {
            search: search.into(),
            filter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockRow {
    pub item: StockItem,
    pub videos: Vec<VideoRecord>,
    pub status: VideoStatus,
}

/// Free-text match on make, model, "make model", or plate.
pub fn matches_search(item: &StockItem, search: &str) -> bool {
    let needle = search.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    let make = item.make.to_lowercase();
    let model = item.model.to_lowercase();
    if make.contains(&needle)
        || model.contains(&needle)
        || format!("{make} {model}").contains(&needle)
    {
        return true;
    }
    normalize_plate(&item.registration_plate).contains(&normalize_plate(search))
}

/// Text filter first, then status filter, over an existing join.
pub fn filter_rows(query: &StockQuery, stock: &[StockItem], join: &ReconciliationJoin) -> Vec<StockRow> {
    stock
        .iter()
        .filter(|item| matches_search(item, &query.search))
        .filter_map(|item| {
            let videos = join.matches(&item.id);
            let status = VideoStatus::from_count(videos.len());
            query.filter.admits(status).then(|| StockRow {
                item: item.clone(),
                videos: videos.to_vec(),
                status,
            })
        })
        .collect()
}

/// Whole view from raw snapshots.
pub fn view(query: &StockQuery, stock: &[StockItem], videos: &[VideoRecord]) -> Vec<StockRow> {
    filter_rows(query, stock, &join(stock, videos))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoverageSummary {
    pub total: usize,
    pub with_video: usize,
    pub without_video: usize,
}

pub fn coverage(stock: &[StockItem], join: &ReconciliationJoin) -> CoverageSummary {
    let with_video = stock
        .iter()
        .filter(|item| join.status(&item.id).has_video())
        .count();
    CoverageSummary {
        total: stock.len(),
        with_video,
        without_video: stock.len() - with_video,
    }
}

/// `{base}/watch/{video_id}?sharedBy=<name>`.
///
/// Attribution names whoever is sharing now; the uploader is only the fallback.
pub fn share_link(base: &Url, video: &VideoRecord, sharer: Option<&Identity>) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| PortalError::Validation(format!("cannot build links under {base}")))?
        .pop_if_empty()
        .push("watch")
        .push(&video.id);
    url.set_query(None);

    let attribution = sharer
        .map(|identity| identity.username.trim())
        .filter(|name| !name.is_empty())
        .or_else(|| {
            video
                .uploader_name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
        });
    if let Some(name) = attribution {
        url.query_pairs_mut().append_pair("sharedBy", name);
    }
    Ok(url)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::Role;
    use chrono::{TimeZone, Utc};

    pub(crate) fn stock(id: &str, plate: &str, make: &str, model: &str) -> StockItem {
        StockItem {
            id: id.to_string(),
            registration_plate: plate.to_string(),
            make: make.to_string(),
            model: model.to_string(),
            derivative: String::new(),
            mileage: 0,
            media: vec![],
        }
    }

    pub(crate) fn video(id: &str, title: &str) -> VideoRecord {
        VideoRecord {
            id: id.to_string(),
            title: title.to_string(),
            uploader_id: "u1".to_string(),
            uploader_name: Some("uploader".to_string()),
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
            view_count: 0,
            video_url: format!("https://cdn.example.com/{id}.mp4"),
            vehicle_details: None,
        }
    }

    #[test]
    fn test_normalization_ignores_case_and_whitespace() {
        assert_eq!(normalize_plate("AB12 CDE"), "AB12CDE");
        assert_eq!(normalize_plate(" ab12\tcde\n"), "AB12CDE");

        let videos = [video("v1", "Ford Focus - AB12CDE")];
        for plate in ["AB12 CDE", "ab12cde"] {
            let joined = join(&[stock("1", plate, "Ford", "Focus")], &videos);
            assert_eq!(joined.video_ids("1"), vec!["v1"], "{plate}");
        }
    }

    #[test]
    fn test_spaced_title_matches_compact_plate() {
        let joined = join(
            &[stock("1", "AB12CDE", "Ford", "Focus")],
            &[video("v1", "Ford Focus - AB12 CDE")],
        );
        assert_eq!(joined.video_ids("1"), vec!["v1"]);
    }

    #[test]
    fn test_unmatched_plate_has_no_video() {
        let joined = join(
            &[stock("9", "XY99ZZZ", "Kia", "Ceed")],
            &[video("v1", "Ford Focus - AB12CDE")],
        );
        assert!(joined.matches("9").is_empty());
        assert_eq!(joined.status("9").label(), "No Video");
    }

    #[test]
    fn test_several_matches_keep_snapshot_order() {
        let videos = [
            video("v1", "BMW 3 Series - AB12CDE v1"),
            video("v2", "unrelated"),
            video("v3", "AB12CDE walkaround"),
        ];
        let joined = join(&[stock("1", "AB12CDE", "BMW", "3 Series")], &videos);
        assert_eq!(joined.video_ids("1"), vec!["v1", "v3"]);
        assert_eq!(joined.status("1"), VideoStatus::Multiple(2));
        assert_eq!(joined.status("1").label(), "2 Videos");
    }

    #[test]
    fn test_one_video_may_serve_several_plates() {
        let videos = [video("v1", "AB12CDE and XY99ZZZ side by side")];
        let joined = join(
            &[stock("1", "AB12CDE", "A", "A"), stock("2", "XY99ZZZ", "B", "B")],
            &videos,
        );
        assert_eq!(joined.video_ids("1"), vec!["v1"]);
        assert_eq!(joined.video_ids("2"), vec!["v1"]);
    }

    #[test]
    fn test_join_is_deterministic() {
        let items = [stock("1", "AB12CDE", "Ford", "Focus"), stock("2", "CD34EFG", "VW", "Golf")];
        let videos = [video("v1", "Golf CD34 EFG"), video("v2", "ab12cde")];
        assert_eq!(join(&items, &videos), join(&items, &videos));
    }

    #[test]
    fn test_search_and_status_filters_compose() {
        let items = [
            stock("1", "AB12CDE", "Ford", "Focus"),
            stock("2", "CD34EFG", "Ford", "Fiesta"),
            stock("3", "GH56IJK", "Vauxhall", "Corsa"),
        ];
        let videos = [video("v1", "Ford Focus - AB12CDE")];

        let ids = |rows: Vec<StockRow>| rows.into_iter().map(|r| r.item.id).collect::<Vec<_>>();

        assert_eq!(ids(view(&StockQuery::new("ford", VideoFilter::All), &items, &videos)), ["1", "2"]);
        assert_eq!(ids(view(&StockQuery::new("ford", VideoFilter::HasVideo), &items, &videos)), ["1"]);
        assert_eq!(ids(view(&StockQuery::new("ford", VideoFilter::NoVideo), &items, &videos)), ["2"]);
        assert_eq!(ids(view(&StockQuery::new("", VideoFilter::NoVideo), &items, &videos)), ["2", "3"]);
        assert_eq!(ids(view(&StockQuery::new("gh56 ijk", VideoFilter::All), &items, &videos)), ["3"]);
        assert_eq!(ids(view(&StockQuery::new("ford fiesta", VideoFilter::All), &items, &videos)), ["2"]);
    }

    #[test]
    fn test_coverage_counts_rows() {
        let items = [stock("1", "AB12CDE", "Ford", "Focus"), stock("2", "CD34EFG", "VW", "Golf")];
        let summary = coverage(&items, &join(&items, &[video("v1", "AB12CDE")]));
        assert_eq!(
            summary,
            CoverageSummary { total: 2, with_video: 1, without_video: 1 }
        );
    }

    #[test]
    fn test_share_link_prefers_current_sharer() {
        let base = Url::parse("https://portal.example.com/").unwrap();
        let clip = video("v1", "Ford Focus - AB12CDE");
        let sharer = Identity {
            subject_id: "s1".into(),
            username: "jane smith".into(),
            role: Role::Staff,
            credential: "t".into(),
            email: None,
            phone: None,
        };

        let link = share_link(&base, &clip, Some(&sharer)).unwrap();
        assert_eq!(link.as_str(), "https://portal.example.com/watch/v1?sharedBy=jane+smith");

        let link = share_link(&base, &clip, None).unwrap();
        assert_eq!(link.as_str(), "https://portal.example.com/watch/v1?sharedBy=uploader");

        let nameless = Identity { username: "  ".into(), ..sharer };
        let anonymous = VideoRecord { uploader_name: None, ..clip };
        let link = share_link(&base, &anonymous, Some(&nameless)).unwrap();
        assert_eq!(link.as_str(), "https://portal.example.com/watch/v1");
    }
}
