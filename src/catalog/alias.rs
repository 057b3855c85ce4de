//! Repeat groups: several paths that resolve to one physical track.
//!
//! Members form a doubly linked chain through `prev`/`next` ids. The head is
//! the canonical member. Every member carries its own copy of the shared
//! [`Features`], so any edit must be pushed down the chain with
//! [`Catalog::propagate_from_canonical`].

use super::{Catalog, CatalogError, Features, Result, TrackId};

/// Tracks that share a fingerprint with a given track.
#[derive(Debug, Default, PartialEq)]
pub struct AliasCandidates {
    /// Same device and inode: the same file under another path.
    pub confirmed: Vec<TrackId>,
    /// Fingerprint matches only. Never merged automatically.
    pub collisions: Vec<TrackId>,
}

impl Catalog {
    /// Make `track` a repeat of `canonical`.
    ///
    /// `track` takes a copy of the canonical features (and any tags it lacks)
    /// and is appended to the tail of the chain. A track already in another
    /// chain leaves it first.
    pub fn declare_repeat(&mut self, track: TrackId, canonical: TrackId) -> Result<()> {
        let source = self.track(canonical)?.clone();
        let path = self.track(track)?.path().to_string();

        let head = self.canonical_of(canonical)?;
        if track == canonical || track == head {
            return Err(CatalogError::SelfRepeat(path));
        }

        let already_member = self.chain(head)?.contains(&track);
        if !already_member {
            self.unlink(track)?;
            let tail = self.tail_of(canonical)?;
            self.track_mut(tail)?.next = Some(track);
            self.track_mut(track)?.prev = Some(tail);
        }

        let t = self.track_mut(track)?;
        t.features = source.features.clone();
        if t.title.is_none() && t.artist.is_none() && t.album.is_none() {
            t.title = source.title.clone();
            t.artist = source.artist.clone();
            t.album = source.album.clone();
        }
        if t.duration_secs == 0 {
            t.duration_secs = source.duration_secs;
        }
        if t.format.is_none() {
            t.format = source.format;
        }
        self.dirty = true;

        log::debug!("{} repeats {}", path, source.path());
        Ok(())
    }

    /// Path-based form of [`declare_repeat`](Self::declare_repeat), as used
    /// when replaying persisted declarations.
    pub fn declare_repeat_path(&mut self, alias: &str, canonical: &str) -> Result<()> {
        let canonical_id = self
            .lookup_by_path(canonical)
            .ok_or_else(|| CatalogError::UnknownCanonical(canonical.to_string()))?;
        let alias_id = self
            .lookup_by_path(alias)
            .ok_or_else(|| CatalogError::UnknownPath(alias.to_string()))?;
        self.declare_repeat(alias_id, canonical_id)
    }

    /// Copy the features of `source` to every other member of its chain,
    /// walking both directions. Returns how many members changed, so a
    /// second call with no intervening edit returns 0.
    pub fn propagate_from_canonical(&mut self, source: TrackId) -> Result<usize> {
        let features = self.track(source)?.features.clone();
        let mut changed = 0;

        let mut cursor = self.track(source)?.prev;
        while let Some(id) = cursor {
            changed += usize::from(self.overwrite_features(id, &features)?);
            cursor = self.track(id)?.prev;
        }
        let mut cursor = self.track(source)?.next;
        while let Some(id) = cursor {
            changed += usize::from(self.overwrite_features(id, &features)?);
            cursor = self.track(id)?.next;
        }

        if changed > 0 {
            self.dirty = true;
        }
        Ok(changed)
    }

    /// Bring a member back in line with its chain after its record was
    /// replaced: a head propagates, an alias copies from the head.
    pub(super) fn sync_with_chain(&mut self, id: TrackId) -> Result<()> {
        let head = self.canonical_of(id)?;
        if head == id {
            self.propagate_from_canonical(id)?;
        } else {
            let features = self.track(head)?.features.clone();
            self.overwrite_features(id, &features)?;
        }
        Ok(())
    }

    /// Edit a track's features and push the result to its aliases.
    pub fn update_features(
        &mut self,
        id: TrackId,
        edit: impl FnOnce(&mut Features),
    ) -> Result<()> {
        edit(&mut self.track_mut(id)?.features);
        self.dirty = true;
        self.propagate_from_canonical(id)?;
        Ok(())
    }

    /// Remove `id` from its chain, joining its neighbours. The record itself
    /// stays in the catalog with no links.
    pub fn unlink(&mut self, id: TrackId) -> Result<()> {
        let (prev, next) = {
            let t = self.track(id)?;
            (t.prev, t.next)
        };
        if let Some(p) = prev {
            self.track_mut(p)?.next = next;
        }
        if let Some(n) = next {
            self.track_mut(n)?.prev = prev;
        }
        let t = self.track_mut(id)?;
        t.prev = None;
        t.next = None;
        if prev.is_some() || next.is_some() {
            self.dirty = true;
        }
        Ok(())
    }

    /// The head of the chain containing `id`.
    pub fn canonical_of(&self, id: TrackId) -> Result<TrackId> {
        let mut current = id;
        while let Some(prev) = self.track(current)?.prev {
            current = prev;
        }
        Ok(current)
    }

    fn tail_of(&self, id: TrackId) -> Result<TrackId> {
        let mut current = id;
        while let Some(next) = self.track(current)?.next {
            current = next;
        }
        Ok(current)
    }

    /// All members of the chain containing `id`, head first.
    pub fn chain(&self, id: TrackId) -> Result<Vec<TrackId>> {
        let mut members = Vec::new();
        let mut cursor = Some(self.canonical_of(id)?);
        while let Some(current) = cursor {
            members.push(current);
            cursor = self.track(current)?.next;
        }
        Ok(members)
    }

    /// Chains with more than one member, each listed head first.
    pub fn repeat_groups(&self) -> Vec<Vec<TrackId>> {
        self.iter()
            .filter(|(_, t)| t.prev.is_none() && t.next.is_some())
            .filter_map(|(id, _)| self.chain(id).ok())
            .collect()
    }

    /// `(alias_path, repeats_path)` pairs, where `repeats_path` is the
    /// alias's immediate predecessor. Replaying them in any order that puts
    /// each predecessor first rebuilds every chain.
    pub fn alias_declarations(&self) -> Vec<(String, String)> {
        self.iter()
            .filter_map(|(_, t)| {
                let prev = self.get(t.prev?)?;
                Some((t.path().to_string(), prev.path().to_string()))
            })
            .collect()
    }

    /// Other tracks sharing `id`'s fingerprint, split into confirmed
    /// duplicates and plain hash collisions. Members of `id`'s own chain are
    /// left out.
    pub fn find_alias_candidates(&self, id: TrackId) -> Result<AliasCandidates> {
        let track = self.track(id)?;
        let own_chain = self.chain(id)?;
        let mut candidates = AliasCandidates::default();

        for &other in self.lookup_by_fingerprint(track.identity.fingerprint) {
            if own_chain.contains(&other) {
                continue;
            }
            let Some(other_track) = self.get(other) else {
                continue;
            };
            if track.identity.same_file(&other_track.identity) {
                candidates.confirmed.push(other);
            } else {
                candidates.collisions.push(other);
            }
        }
        Ok(candidates)
    }

    fn overwrite_features(&mut self, id: TrackId, features: &Features) -> Result<bool> {
        let t = self.track_mut(id)?;
        if t.features == *features {
            return Ok(false);
        }
        t.features = features.clone();
        Ok(true)
    }
}
