#![forbid(unsafe_code)]

use std::sync::Arc;

use skene_core::MediaType;

use crate::Period;

/// Read-only description of a media presentation.
///
/// Periods are kept sorted by start time by construction.
#[derive(Clone, Debug)]
pub struct Manifest {
    periods: Vec<Arc<Period>>,
    /// Whether the presentation is still growing (live).
    pub is_dynamic: bool,
    /// Earliest seekable position in seconds.
    pub minimum_position: f64,
    /// Latest seekable position in seconds; for dynamic manifests this is
    /// the current live edge.
    pub maximum_position: f64,
}

impl Manifest {
    /// Build a manifest from periods; they are sorted by start time.
    #[must_use]
    pub fn new(
        mut periods: Vec<Arc<Period>>,
        is_dynamic: bool,
        minimum_position: f64,
        maximum_position: f64,
    ) -> Self {
        periods.sort_by(|a, b| a.start.total_cmp(&b.start));
        Self {
            periods,
            is_dynamic,
            minimum_position,
            maximum_position,
        }
    }

    #[must_use]
    pub fn periods(&self) -> &[Arc<Period>] {
        &self.periods
    }

    /// The Period containing `time`, if any.
    #[must_use]
    pub fn period_containing(&self, time: f64) -> Option<&Arc<Period>> {
        self.periods.iter().find(|p| p.contains(time))
    }

    /// The Period immediately following `period`, by start order.
    #[must_use]
    pub fn period_after(&self, period: &Period) -> Option<&Arc<Period>> {
        let pos = self.periods.iter().position(|p| p.id == period.id)?;
        self.periods.get(pos + 1)
    }

    #[must_use]
    pub fn period_by_id(&self, id: &str) -> Option<&Arc<Period>> {
        self.periods.iter().find(|p| p.id == id)
    }
}

/// One Representation's decipherability flip inside an update batch.
#[derive(Clone, Debug)]
pub struct DecipherabilityStatus {
    pub media_type: MediaType,
    pub adaptation_id: String,
    pub representation_id: String,
    pub decipherable: bool,
}

/// Signal that keys became (un)available for some Representations.
///
/// Emitted by the manifest owner; the buffer orchestrator reacts by
/// flushing ranges that belong to now-undecipherable Representations.
#[derive(Clone, Debug)]
pub struct DecipherabilityUpdate {
    pub updates: Vec<DecipherabilityStatus>,
}

impl DecipherabilityUpdate {
    /// Representation ids turned undecipherable for `media_type`.
    pub fn undecipherable_for(&self, media_type: MediaType) -> impl Iterator<Item = &str> {
        self.updates
            .iter()
            .filter(move |u| u.media_type == media_type && !u.decipherable)
            .map(|u| u.representation_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn period(id: &str, start: f64, duration: Option<f64>) -> Arc<Period> {
        Arc::new(Period {
            id: id.into(),
            start,
            duration,
            adaptations: BTreeMap::new(),
            is_loaded: true,
        })
    }

    #[test]
    fn periods_sorted_on_construction() {
        let m = Manifest::new(
            vec![period("b", 60.0, Some(40.0)), period("a", 0.0, Some(60.0))],
            false,
            0.0,
            100.0,
        );
        assert_eq!(m.periods()[0].id, "a");
        assert_eq!(m.periods()[1].id, "b");
    }

    #[test]
    fn period_lookup_and_chaining() {
        let m = Manifest::new(
            vec![period("a", 0.0, Some(60.0)), period("b", 60.0, Some(40.0))],
            false,
            0.0,
            100.0,
        );
        assert_eq!(m.period_containing(30.0).unwrap().id, "a");
        assert_eq!(m.period_containing(60.0).unwrap().id, "b");
        assert!(m.period_containing(100.0).is_none());

        let a = m.period_by_id("a").unwrap().clone();
        assert_eq!(m.period_after(&a).unwrap().id, "b");
        let b = m.period_by_id("b").unwrap().clone();
        assert!(m.period_after(&b).is_none());
    }

    #[test]
    fn decipherability_filter() {
        let update = DecipherabilityUpdate {
            updates: vec![
                DecipherabilityStatus {
                    media_type: MediaType::Video,
                    adaptation_id: "va".into(),
                    representation_id: "v1".into(),
                    decipherable: false,
                },
                DecipherabilityStatus {
                    media_type: MediaType::Audio,
                    adaptation_id: "aa".into(),
                    representation_id: "a1".into(),
                    decipherable: true,
                },
            ],
        };
        let video: Vec<_> = update.undecipherable_for(MediaType::Video).collect();
        assert_eq!(video, vec!["v1"]);
        assert_eq!(update.undecipherable_for(MediaType::Audio).count(), 0);
    }
}
