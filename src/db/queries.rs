use std::collections::{HashMap, HashSet};

use super::models::{LibraryStats, LoadReport, TrackRow};
use super::{Database, Result};
use crate::catalog::{Catalog, CatalogError, Track};
use crate::identity::{FsProbe, resolve_identity};
use rusqlite::params;

impl Database {
    /// Persist the catalog, replacing whatever was stored.
    ///
    /// Unreachable tracks are spliced out of their chains and dropped first.
    /// Returns how many were dropped.
    pub fn save_catalog(&self, catalog: &mut Catalog) -> Result<usize> {
        let pruned = catalog.prune_unreachable();

        let predecessors: HashMap<String, String> =
            catalog.alias_declarations().into_iter().collect();

        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM tracks", [])?;
        tx.execute("DELETE FROM not_tracks", [])?;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO tracks (
                    position, path, repeats, title, artist, album, duration_secs, format,
                    device, inode, tempo_bpm, spectrum, volume_diff,
                    color_h, color_s, color_v, rating
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            )?;
            for (position, (_, track)) in catalog.iter().enumerate() {
                let repeats = predecessors.get(track.path()).map(String::as_str);
                let r = TrackRow::from_track(track, repeats)?;
                stmt.execute(params![
                    position as i64,
                    r.path,
                    r.repeats,
                    r.title,
                    r.artist,
                    r.album,
                    r.duration_secs,
                    r.format,
                    r.device,
                    r.inode,
                    r.tempo_bpm,
                    r.spectrum,
                    r.volume_diff,
                    r.color_h,
                    r.color_s,
                    r.color_v,
                    r.rating,
                ])?;
            }

            let mut stmt = tx.prepare_cached("INSERT INTO not_tracks (path) VALUES (?1)")?;
            for path in catalog.not_tracks() {
                stmt.execute(params![path])?;
            }
        }

        tx.commit()?;
        catalog.mark_clean();
        log::info!(
            "Saved {} tracks and {} non-tracks ({} unreachable dropped)",
            catalog.len(),
            catalog.not_tracks().len(),
            pruned
        );
        Ok(pruned)
    }

    /// Rebuild the catalog from the stored rows.
    ///
    /// Every track is marked and probed for reachability. Alias declarations
    /// are replayed once the track they repeat is settled, whatever the
    /// storage order; those that never resolve are reported as orphans.
    /// Non-track paths are only kept while the file still exists.
    pub fn load_catalog(
        &self,
        probe: &dyn FsProbe,
        verify_devices: bool,
    ) -> Result<(Catalog, LoadReport)> {
        let rows = self.get_track_rows()?;
        let mut catalog = Catalog::new();
        let mut report = LoadReport::default();
        let mut pending: Vec<(String, String)> = Vec::new();
        let mut missing: Vec<String> = Vec::new();

        for row in rows {
            let mut track = Track::new(&row.path);
            track.title = row.title.clone();
            track.artist = row.artist.clone();
            track.album = row.album.clone();
            track.duration_secs = row.duration_secs;
            track.format = row.audio_format();
            track.identity = resolve_identity(
                probe,
                &row.path,
                row.inode as u64,
                row.device.map(|d| d as u64),
                verify_devices,
            );
            *track.features_mut() = row.features();
            track.features_mut().marked = true;

            if !probe.is_reachable(&row.path) {
                missing.push(row.path.clone());
            }
            if let Some(repeats) = row.repeats.filter(|r| !r.is_empty()) {
                pending.push((row.path.clone(), repeats));
            }
            catalog.insert(track);
        }

        report.orphans = replay_declarations(&mut catalog, pending);

        let heads: Vec<_> = catalog
            .iter()
            .filter(|(_, t)| t.is_canonical() && t.next().is_some())
            .map(|(id, _)| id)
            .collect();
        for head in heads {
            catalog.propagate_from_canonical(head)?;
        }

        for path in self.get_not_tracks()? {
            if probe.is_reachable(&path) {
                catalog.add_not_track(&path);
            } else {
                report.dropped_not_tracks += 1;
            }
        }

        catalog.mark_clean();
        for path in &missing {
            if let Some(id) = catalog.lookup_by_path(path) {
                log::info!("{} is no longer reachable", path);
                catalog.mark_unreachable(id)?;
            }
        }

        report.tracks = catalog.len();
        report.not_tracks = catalog.not_tracks().len();
        report.unreachable = missing.len();
        log::info!(
            "Loaded {} tracks, {} non-tracks ({} unreachable, {} orphaned repeats)",
            report.tracks,
            report.not_tracks,
            report.unreachable,
            report.orphans.len()
        );
        Ok((catalog, report))
    }

    fn get_track_rows(&self) -> Result<Vec<TrackRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT path, repeats, title, artist, album, duration_secs, format,
                    device, inode, tempo_bpm, spectrum, volume_diff,
                    color_h, color_s, color_v, rating
             FROM tracks ORDER BY position, id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(TrackRow {
                    path: row.get(0)?,
                    repeats: row.get(1)?,
                    title: row.get(2)?,
                    artist: row.get(3)?,
                    album: row.get(4)?,
                    duration_secs: row.get(5)?,
                    format: row.get(6)?,
                    device: row.get(7)?,
                    inode: row.get(8)?,
                    tempo_bpm: row.get(9)?,
                    spectrum: row.get(10)?,
                    volume_diff: row.get(11)?,
                    color_h: row.get(12)?,
                    color_s: row.get(13)?,
                    color_v: row.get(14)?,
                    rating: row.get(15)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    fn get_not_tracks(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT path FROM not_tracks ORDER BY id")?;
        let paths = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(paths)
    }

    /// Get library statistics.
    pub fn stats(&self) -> Result<LibraryStats> {
        let count =
            |sql: &str| -> Result<i64> { Ok(self.conn.query_row(sql, [], |row| row.get(0))?) };

        let total_tracks = count("SELECT COUNT(*) FROM tracks")?;
        let repeat_tracks = count("SELECT COUNT(*) FROM tracks WHERE repeats IS NOT NULL")?;
        let analyzed_tracks = count("SELECT COUNT(*) FROM tracks WHERE spectrum IS NOT NULL")?;
        let colored_tracks = count("SELECT COUNT(*) FROM tracks WHERE color_h IS NOT NULL")?;
        let not_tracks = count("SELECT COUNT(*) FROM not_tracks")?;

        let total_duration_hours: f64 = self.conn.query_row(
            "SELECT COALESCE(SUM(duration_secs), 0) / 3600.0 FROM tracks WHERE repeats IS NULL",
            [],
            |row| row.get(0),
        )?;

        let mut fmt_stmt = self.conn.prepare(
            "SELECT COALESCE(format, 'unknown'), COUNT(*) FROM tracks
             WHERE repeats IS NULL
             GROUP BY format ORDER BY COUNT(*) DESC",
        )?;
        let formats: Vec<(String, i64)> = fmt_stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(LibraryStats {
            total_tracks,
            repeat_tracks,
            analyzed_tracks,
            colored_tracks,
            not_tracks,
            total_duration_hours,
            formats,
        })
    }
}

/// Replay `(alias, repeats)` declarations in passes. A declaration waits
/// while the track it repeats still has an unresolved declaration of its
/// own, so every chain is rebuilt in its stored order. Returns the ones
/// that could not be applied.
fn replay_declarations(
    catalog: &mut Catalog,
    mut pending: Vec<(String, String)>,
) -> Vec<(String, String)> {
    let mut orphans = Vec::new();

    loop {
        let waiting: HashSet<String> = pending.iter().map(|(alias, _)| alias.clone()).collect();
        let before = pending.len();
        let mut deferred = Vec::new();

        for (alias, repeats) in pending {
            if waiting.contains(&repeats) {
                deferred.push((alias, repeats));
                continue;
            }
            match catalog.declare_repeat_path(&alias, &repeats) {
                Ok(()) => {}
                Err(CatalogError::UnknownCanonical(_)) => {
                    log::warn!("{} repeats {}, which is not in the catalog", alias, repeats);
                    orphans.push((alias, repeats));
                }
                Err(e) => {
                    log::warn!("Ignoring repeat declaration for {}: {}", alias, e);
                    orphans.push((alias, repeats));
                }
            }
        }

        pending = deferred;
        if pending.is_empty() || pending.len() == before {
            break;
        }
    }

    for (alias, repeats) in &pending {
        log::warn!("Circular repeat declaration: {} repeats {}", alias, repeats);
    }
    orphans.extend(pending);
    orphans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Hsv, SPECTRUM_BINS, Spectrum};
    use crate::identity::tests::FakeProbe;
    use crate::identity::Identity;

    fn analysed(path: &str, inode: u64) -> Track {
        let mut t = Track::new(path);
        t.title = Some(format!("title of {path}"));
        t.duration_secs = 240;
        t.format = crate::catalog::AudioFormat::parse("flac");
        t.identity = Identity::new(inode, 8);
        let f = t.features_mut();
        f.tempo = Some(122.0);
        f.spectrum = Some(Spectrum::new([0.125; SPECTRUM_BINS], 0.5));
        f.color = Some(Hsv::new(4.5, 0.25, 0.75));
        f.set_rating(4.0);
        t
    }

    fn insert_raw(db: &Database, position: i64, path: &str, repeats: Option<&str>) {
        db.conn
            .execute(
                "INSERT INTO tracks (position, path, repeats, device, inode) VALUES (?1, ?2, ?3, 8, ?4)",
                params![position, path, repeats, position + 100],
            )
            .unwrap();
    }

    fn probe_for(paths: &[&str]) -> FakeProbe {
        paths
            .iter()
            .enumerate()
            .fold(FakeProbe::default(), |p, (i, path)| p.with(path, 8, 100 + i as u64))
    }

    #[test]
    fn test_catalog_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let mut cat = Catalog::new();
        let c = cat.insert(analysed("/m/orig.flac", 1));
        let a = cat.insert(Track::new("/m/a.flac"));
        cat.declare_repeat(a, c).unwrap();
        cat.insert(Track::new("/m/plain.flac"));
        cat.add_not_track("/m/cover.jpg");

        db.save_catalog(&mut cat).unwrap();
        assert!(!cat.is_dirty());

        let probe = probe_for(&["/m/orig.flac", "/m/a.flac", "/m/plain.flac", "/m/cover.jpg"]);
        let (loaded, report) = db.load_catalog(&probe, true).unwrap();

        assert_eq!(report.tracks, 3);
        assert_eq!(report.not_tracks, 1);
        assert!(report.orphans.is_empty());
        assert!(!loaded.is_dirty());

        let lc = loaded.lookup_by_path("/m/orig.flac").unwrap();
        let la = loaded.lookup_by_path("/m/a.flac").unwrap();
        assert_eq!(loaded.chain(la).unwrap(), vec![lc, la]);

        let orig = loaded.track(lc).unwrap();
        let alias = loaded.track(la).unwrap();
        assert!(orig.features().marked);
        assert_eq!(orig.features().tempo, Some(122.0));
        assert_eq!(orig.features().color, Some(Hsv::new(4.5, 0.25, 0.75)));
        assert_eq!(orig.features().rating, Some(4.0));
        assert_eq!(alias.features(), orig.features());
        assert_eq!(alias.title, orig.title);
        assert_eq!(orig.identity, Identity::new(1, 8));
        assert!(loaded.is_not_track("/m/cover.jpg"));
    }

    #[test]
    fn test_aliases_stored_before_their_canonical() {
        let db = Database::open_in_memory().unwrap();
        // b repeats a, a repeats c; stored tail first.
        insert_raw(&db, 0, "/m/b.mp3", Some("/m/a.mp3"));
        insert_raw(&db, 1, "/m/a.mp3", Some("/m/c.mp3"));
        insert_raw(&db, 2, "/m/c.mp3", None);
        db.conn
            .execute("UPDATE tracks SET tempo_bpm = 140.0 WHERE path = '/m/c.mp3'", [])
            .unwrap();

        let probe = probe_for(&["/m/a.mp3", "/m/b.mp3", "/m/c.mp3"]);
        let (cat, report) = db.load_catalog(&probe, true).unwrap();
        assert!(report.orphans.is_empty());

        let id = |p: &str| cat.lookup_by_path(p).unwrap();
        assert_eq!(
            cat.chain(id("/m/b.mp3")).unwrap(),
            vec![id("/m/c.mp3"), id("/m/a.mp3"), id("/m/b.mp3")]
        );
        assert_eq!(cat.track(id("/m/b.mp3")).unwrap().features().tempo, Some(140.0));
    }

    #[test]
    fn test_unknown_and_circular_repeats_are_orphans() {
        let db = Database::open_in_memory().unwrap();
        insert_raw(&db, 0, "/m/lost.mp3", Some("/m/nowhere.mp3"));
        insert_raw(&db, 1, "/m/x.mp3", Some("/m/y.mp3"));
        insert_raw(&db, 2, "/m/y.mp3", Some("/m/x.mp3"));

        let probe = probe_for(&["/m/lost.mp3", "/m/x.mp3", "/m/y.mp3"]);
        let (cat, report) = db.load_catalog(&probe, true).unwrap();

        assert_eq!(report.orphans.len(), 3);
        assert!(report
            .orphans
            .contains(&("/m/lost.mp3".to_string(), "/m/nowhere.mp3".to_string())));
        // Orphans stay as standalone tracks.
        assert_eq!(cat.len(), 3);
        assert!(cat.iter().all(|(_, t)| t.is_canonical() && t.next().is_none()));
    }

    #[test]
    fn test_unreachable_tracks_are_flagged_then_pruned_on_save() {
        let db = Database::open_in_memory().unwrap();
        insert_raw(&db, 0, "/m/c.mp3", None);
        insert_raw(&db, 1, "/m/gone.mp3", Some("/m/c.mp3"));
        insert_raw(&db, 2, "/m/b.mp3", Some("/m/gone.mp3"));
        db.conn
            .execute("INSERT INTO not_tracks (path) VALUES ('/m/old.txt')", [])
            .unwrap();

        let probe = probe_for(&["/m/c.mp3", "/m/b.mp3"]);
        let (mut cat, report) = db.load_catalog(&probe, true).unwrap();
        assert_eq!(report.unreachable, 1);
        assert_eq!(report.dropped_not_tracks, 1);
        assert!(cat.is_dirty());

        let gone = cat.lookup_by_path("/m/gone.mp3").unwrap();
        assert!(!cat.track(gone).unwrap().reachable);

        assert_eq!(db.save_catalog(&mut cat).unwrap(), 1);
        let (reloaded, report) = db.load_catalog(&probe, true).unwrap();
        assert!(report.orphans.is_empty());
        let c = reloaded.lookup_by_path("/m/c.mp3").unwrap();
        let b = reloaded.lookup_by_path("/m/b.mp3").unwrap();
        assert_eq!(reloaded.chain(c).unwrap(), vec![c, b]);
        assert_eq!(reloaded.lookup_by_path("/m/gone.mp3"), None);
    }

    #[test]
    fn test_missing_device_is_read_from_disk() {
        let db = Database::open_in_memory().unwrap();
        db.conn
            .execute(
                "INSERT INTO tracks (position, path, inode) VALUES (0, '/m/a.mp3', 5)",
                [],
            )
            .unwrap();
        let probe = FakeProbe::default().with("/m/a.mp3", 2, 5);

        let (cat, _) = db.load_catalog(&probe, true).unwrap();
        let id = cat.lookup_by_path("/m/a.mp3").unwrap();
        assert_eq!(cat.track(id).unwrap().identity.fingerprint, 131_077);

        let (cat, _) = db.load_catalog(&probe, false).unwrap();
        let id = cat.lookup_by_path("/m/a.mp3").unwrap();
        assert_eq!(cat.track(id).unwrap().identity.device, 0);
    }

    #[test]
    fn test_two_channel_colour_is_converted() {
        let db = Database::open_in_memory().unwrap();
        db.conn
            .execute(
                "INSERT INTO tracks (position, path, color_h, color_v) VALUES (0, '/m/a.mp3', 2.0, 0.25)",
                [],
            )
            .unwrap();
        let probe = probe_for(&["/m/a.mp3"]);
        let (cat, _) = db.load_catalog(&probe, true).unwrap();
        let id = cat.lookup_by_path("/m/a.mp3").unwrap();
        assert_eq!(
            cat.track(id).unwrap().features().color,
            Some(Hsv::from_hue_brightness(2.0, 0.25))
        );
    }

    #[test]
    fn test_stats() {
        let db = Database::open_in_memory().unwrap();
        let mut cat = Catalog::new();
        let c = cat.insert(analysed("/m/orig.flac", 1));
        let a = cat.insert(Track::new("/m/a.flac"));
        cat.declare_repeat(a, c).unwrap();
        cat.insert(Track::new("/m/bare.mp3"));
        cat.add_not_track("/m/notes.txt");
        db.save_catalog(&mut cat).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.total_tracks, 3);
        assert_eq!(stats.repeat_tracks, 1);
        assert_eq!(stats.analyzed_tracks, 1);
        assert_eq!(stats.colored_tracks, 1);
        assert_eq!(stats.not_tracks, 1);
        assert!((stats.total_duration_hours - 240.0 / 3600.0).abs() < 1e-9);
    }
}
