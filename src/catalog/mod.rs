//! In-memory track catalog.
//!
//! Tracks live in an arena addressed by [`TrackId`]. Removing a track leaves
//! a tombstone, so ids held by alias chains or callers never shift. Two
//! indexes sit beside the arena: path → id and fingerprint → ids. A separate
//! set caches paths that were probed and found not to be audio.

pub mod alias;
pub mod track;

pub use alias::AliasCandidates;
pub use track::{
    AudioFormat, DEFAULT_RATING, Features, HUE_RANGE, Hsv, MAX_RATING, MIN_RATING, SPECTRUM_BINS,
    Spectrum, Track,
};

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::identity::{FsProbe, Identity};

/// Stable handle of a track inside one [`Catalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(usize);

impl TrackId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum CatalogError {
    #[error("Unknown track id {0:?}")]
    UnknownTrack(TrackId),
    #[error("Unknown track path: {0}")]
    UnknownPath(String),
    #[error("Cannot repeat unknown path: {0}")]
    UnknownCanonical(String),
    #[error("{0} cannot repeat itself or a track that repeats it")]
    SelfRepeat(String),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, Default, Clone)]
pub struct Catalog {
    slots: Vec<Option<Track>>,
    by_path: HashMap<String, TrackId>,
    by_fingerprint: HashMap<u32, Vec<TrackId>>,
    not_tracks: Vec<String>,
    not_track_set: HashSet<String>,
    dirty: bool,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live tracks.
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    /// Like [`get`](Self::get) but an unknown id is an error.
    pub fn track(&self, id: TrackId) -> Result<&Track> {
        self.get(id).ok_or(CatalogError::UnknownTrack(id))
    }

    pub(crate) fn track_mut(&mut self, id: TrackId) -> Result<&mut Track> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(CatalogError::UnknownTrack(id))
    }

    /// Add a track and index it by path and fingerprint.
    ///
    /// Inserting a path that is already catalogued overwrites that record in
    /// place and returns the existing id. Its chain links survive: a replaced
    /// head pushes its new features to the aliases, a replaced alias takes the
    /// head's features back. Callers normally check
    /// [`lookup_by_path`](Self::lookup_by_path) first.
    pub fn insert(&mut self, mut track: Track) -> TrackId {
        self.remove_not_track(track.path());
        self.dirty = true;

        if let Some(&id) = self.by_path.get(track.path()) {
            let fp = track.identity.fingerprint;
            let old_fp = match self.slots[id.0].as_mut() {
                Some(existing) => {
                    track.prev = existing.prev;
                    track.next = existing.next;
                    let old_fp = existing.identity.fingerprint;
                    *existing = track;
                    old_fp
                }
                None => fp,
            };
            if old_fp != fp {
                self.unindex_fingerprint(id, old_fp);
                self.by_fingerprint.entry(fp).or_default().push(id);
            }
            if let Err(e) = self.sync_with_chain(id) {
                log::warn!("Replaced record {:?} left its chain out of sync: {}", id, e);
            }
            log::debug!("Replaced catalog record {:?}", id);
            return id;
        }

        track.prev = None;
        track.next = None;
        let id = TrackId(self.slots.len());
        self.by_path.insert(track.path().to_string(), id);
        self.by_fingerprint
            .entry(track.identity.fingerprint)
            .or_default()
            .push(id);
        self.slots.push(Some(track));
        id
    }

    pub fn lookup_by_path(&self, path: &str) -> Option<TrackId> {
        self.by_path.get(path).copied()
    }

    /// Every live track sharing `fp`. Collisions between unrelated files are
    /// expected; the list is only a set of candidates.
    pub fn lookup_by_fingerprint(&self, fp: u32) -> &[TrackId] {
        self.by_fingerprint
            .get(&fp)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Re-key a track after its identity changed.
    pub fn set_identity(&mut self, id: TrackId, identity: Identity) -> Result<()> {
        let track = self.track_mut(id)?;
        let old_fp = track.identity.fingerprint;
        track.identity = identity;
        if old_fp != identity.fingerprint {
            self.unindex_fingerprint(id, old_fp);
            self.by_fingerprint
                .entry(identity.fingerprint)
                .or_default()
                .push(id);
        }
        self.dirty = true;
        Ok(())
    }

    /// Flag a track whose file has gone missing. It stays catalogued until
    /// the next [`prune_unreachable`](Self::prune_unreachable).
    pub fn mark_unreachable(&mut self, id: TrackId) -> Result<()> {
        self.track_mut(id)?.reachable = false;
        self.dirty = true;
        Ok(())
    }

    /// Re-probe every track. Returns how many are now unreachable.
    pub fn refresh_reachability(&mut self, probe: &dyn FsProbe) -> usize {
        let mut missing = 0;
        for track in self.slots.iter_mut().flatten() {
            let reachable = probe.is_reachable(track.path());
            if reachable != track.reachable {
                track.reachable = reachable;
                self.dirty = true;
            }
            if !reachable {
                missing += 1;
            }
        }
        missing
    }

    /// Splice every unreachable track out of its chain and drop it.
    /// Returns the number removed.
    pub fn prune_unreachable(&mut self) -> usize {
        let doomed: Vec<TrackId> = self
            .iter()
            .filter(|(_, t)| !t.reachable)
            .map(|(id, _)| id)
            .collect();

        for &id in &doomed {
            if let Err(e) = self.unlink(id) {
                log::warn!("Could not unlink {:?}: {}", id, e);
            }
            if let Some(track) = self.slots[id.0].take() {
                log::info!("Dropping unreachable track {}", track.path());
                self.by_path.remove(track.path());
                self.unindex_fingerprint(id, track.identity.fingerprint);
            }
        }
        if !doomed.is_empty() {
            self.dirty = true;
        }
        doomed.len()
    }

    /// Remember a path that is not audio so it is not probed again.
    /// Returns false if the path is a catalogued track or already cached.
    pub fn add_not_track(&mut self, path: &str) -> bool {
        if self.by_path.contains_key(path) || self.not_track_set.contains(path) {
            return false;
        }
        self.not_track_set.insert(path.to_string());
        self.not_tracks.push(path.to_string());
        self.dirty = true;
        true
    }

    pub fn is_not_track(&self, path: &str) -> bool {
        self.not_track_set.contains(path)
    }

    pub fn not_tracks(&self) -> &[String] {
        &self.not_tracks
    }

    fn remove_not_track(&mut self, path: &str) {
        if self.not_track_set.remove(path) {
            self.not_tracks.retain(|p| p != path);
        }
    }

    /// Live tracks in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (TrackId, &Track)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|t| (TrackId(i), t)))
    }

    /// Frozen copy of the live tracks for read-only sweeps.
    pub fn snapshot(&self) -> Vec<(TrackId, Track)> {
        self.iter().map(|(id, t)| (id, t.clone())).collect()
    }

    /// True when the catalog differs from what was last persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    fn unindex_fingerprint(&mut self, id: TrackId, fp: u32) {
        if let Some(ids) = self.by_fingerprint.get_mut(&fp) {
            ids.retain(|&other| other != id);
            if ids.is_empty() {
                self.by_fingerprint.remove(&fp);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::tests::FakeProbe;

    fn track_with_identity(path: &str, inode: u64, device: u64) -> Track {
        let mut t = Track::new(path);
        t.identity = Identity::new(inode, device);
        t
    }

    #[test]
    fn test_insert_indexes_both_lookups() {
        let mut cat = Catalog::new();
        let id = cat.insert(track_with_identity("/m/a.mp3", 5, 2));

        assert_eq!(cat.lookup_by_path("/m/a.mp3"), Some(id));
        assert_eq!(cat.lookup_by_fingerprint(131_077), &[id]);
        assert_eq!(cat.len(), 1);
        assert!(cat.is_dirty());
    }

    #[test]
    fn test_insert_existing_path_replaces_in_place() {
        let mut cat = Catalog::new();
        let id = cat.insert(track_with_identity("/m/a.mp3", 5, 2));

        let mut replacement = track_with_identity("/m/a.mp3", 6, 2);
        replacement.title = Some("New".into());
        let id2 = cat.insert(replacement);

        assert_eq!(id, id2);
        assert_eq!(cat.len(), 1);
        assert_eq!(cat.iter().count(), 1);
        assert_eq!(cat.track(id).unwrap().title.as_deref(), Some("New"));
        assert!(cat.lookup_by_fingerprint(131_077).is_empty());
        assert_eq!(cat.lookup_by_fingerprint(131_078), &[id]);
    }

    #[test]
    fn test_replacing_chain_members_keeps_features_shared() {
        let mut cat = Catalog::new();
        let mut orig = Track::new("/m/orig.mp3");
        orig.features_mut().tempo = Some(120.0);
        let head = cat.insert(orig);
        let alias = cat.insert(Track::new("/m/copy.mp3"));
        cat.declare_repeat(alias, head).unwrap();

        // New head record: the alias follows it.
        let mut rescanned = Track::new("/m/orig.mp3");
        rescanned.features_mut().tempo = Some(150.0);
        assert_eq!(cat.insert(rescanned), head);
        assert_eq!(cat.chain(head).unwrap(), vec![head, alias]);
        assert_eq!(cat.track(alias).unwrap().features().tempo, Some(150.0));

        // New alias record: it takes the head's features back.
        let mut stray = Track::new("/m/copy.mp3");
        stray.features_mut().tempo = Some(90.0);
        assert_eq!(cat.insert(stray), alias);
        assert_eq!(cat.chain(head).unwrap(), vec![head, alias]);
        assert_eq!(
            cat.track(alias).unwrap().features(),
            cat.track(head).unwrap().features()
        );
    }

    #[test]
    fn test_fingerprint_collisions_are_kept() {
        let mut cat = Catalog::new();
        // Both fold to 0x0001_0000.
        let a = cat.insert(track_with_identity("/m/a.mp3", 1 << 16, 0));
        let b = cat.insert(track_with_identity("/m/b.mp3", 0, 1));
        assert_eq!(cat.lookup_by_fingerprint(1 << 16), &[a, b]);
    }

    #[test]
    fn test_not_tracks_are_disjoint_from_tracks() {
        let mut cat = Catalog::new();
        assert!(cat.add_not_track("/m/cover.jpg"));
        assert!(!cat.add_not_track("/m/cover.jpg"));
        assert!(cat.is_not_track("/m/cover.jpg"));

        // Promoting a cached path to a track evicts it from the cache.
        cat.insert(Track::new("/m/cover.jpg"));
        assert!(!cat.is_not_track("/m/cover.jpg"));
        assert!(cat.not_tracks().is_empty());

        assert!(!cat.add_not_track("/m/cover.jpg"));
    }

    #[test]
    fn test_mark_unreachable_keeps_record_until_prune() {
        let mut cat = Catalog::new();
        let a = cat.insert(Track::new("/m/a.mp3"));
        let b = cat.insert(Track::new("/m/b.mp3"));
        cat.mark_unreachable(a).unwrap();

        assert!(cat.get(a).is_some());
        assert_eq!(cat.prune_unreachable(), 1);
        assert!(cat.get(a).is_none());
        assert_eq!(cat.lookup_by_path("/m/a.mp3"), None);
        // Survivors keep their ids.
        assert_eq!(cat.lookup_by_path("/m/b.mp3"), Some(b));
        assert_eq!(cat.len(), 1);
    }

    #[test]
    fn test_refresh_reachability() {
        let probe = FakeProbe::default().with("/m/a.mp3", 1, 1);
        let mut cat = Catalog::new();
        let a = cat.insert(Track::new("/m/a.mp3"));
        let b = cat.insert(Track::new("/m/b.mp3"));
        cat.mark_clean();

        assert_eq!(cat.refresh_reachability(&probe), 1);
        assert!(cat.track(a).unwrap().reachable);
        assert!(!cat.track(b).unwrap().reachable);
        assert!(cat.is_dirty());
    }

    #[test]
    fn test_set_identity_rekeys_fingerprint() {
        let mut cat = Catalog::new();
        let a = cat.insert(Track::new("/m/a.mp3"));
        assert_eq!(cat.lookup_by_fingerprint(0), &[a]);

        cat.set_identity(a, Identity::new(5, 2)).unwrap();
        assert!(cat.lookup_by_fingerprint(0).is_empty());
        assert_eq!(cat.lookup_by_fingerprint(131_077), &[a]);
    }

    #[test]
    fn test_unknown_id_is_an_error() {
        let mut cat = Catalog::new();
        let a = cat.insert(Track::new("/m/a.mp3"));
        cat.mark_unreachable(a).unwrap();
        cat.prune_unreachable();
        assert_eq!(cat.mark_unreachable(a), Err(CatalogError::UnknownTrack(a)));
    }
}
