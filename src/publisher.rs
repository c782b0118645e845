//! The publishing loop.
//!
//! Drains the prioritized backlog, then the normal one, attempting each
//! request in order until one publishes. Per-request failures never escape
//! the loop; they are classified into outcomes that decide bookkeeping,
//! notification and whether the circuit breaker advances. A credential
//! fault on the publish transport is the one exception: nothing behind it
//! can succeed, so it aborts the whole run.

use crate::assembler::Assembler;
use crate::composer::{expand_tokens, parse_siblings, representative_frames};
use crate::config::Config;
use crate::db::RequestDb;
use crate::discord::AlertChannel;
use crate::error::{Error, Result};
use crate::facebook::PublishTransport;
use crate::notify::Notifier;
use crate::resolver::find_item;
use crate::safety::{SafetyClassifier, gate};
use crate::source::FrameSource;
use crate::types::{CatalogItem, CommandType, ContentToken, Outcome, Request, RequestKind};

pub(crate) struct Publisher<'a> {
    config: &'a Config,
    db: &'a RequestDb,
    source: &'a dyn FrameSource,
    transport: &'a dyn PublishTransport,
    classifier: &'a dyn SafetyClassifier,
    alerts: &'a dyn AlertChannel,
}

impl<'a> Publisher<'a> {
    pub(crate) fn new(
        config: &'a Config,
        db: &'a RequestDb,
        source: &'a dyn FrameSource,
        transport: &'a dyn PublishTransport,
        classifier: &'a dyn SafetyClassifier,
        alerts: &'a dyn AlertChannel,
    ) -> Self {
        Self {
            config,
            db,
            source,
            transport,
            classifier,
            alerts,
        }
    }

    /// One invocation: at most one successful publish. Returns the post id
    /// when something published, `None` when the backlog is exhausted, the
    /// breaker tripped, or the run was dry.
    pub(crate) fn run(&self, kind: RequestKind, published: bool) -> Result<Option<String>> {
        if !self.config.collection_root.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!(
                    "collection not mounted: {}",
                    self.config.collection_root.display()
                ),
            )));
        }
        tracing::info!(kind = kind.as_str(), published, "starting request handler");

        let catalog = match kind {
            RequestKind::Movies => self.db.list_movies()?,
            RequestKind::Episodes => self.db.list_episodes()?,
        };
        let assembler = Assembler::new(self.config)?;
        let notifier = Notifier::new(self.transport, self.config, published);

        let mut counted_errors = 0usize;
        for priority in [true, false] {
            for request in self.db.get_requests(kind, priority)? {
                if counted_errors > self.config.circuit_breaker {
                    tracing::error!(
                        counted_errors,
                        "circuit breaker tripped, aborting remaining backlog"
                    );
                    return Ok(None);
                }
                tracing::info!(
                    request = %request.id,
                    command = request.command.as_str(),
                    comment = %request.comment,
                    "attempting request"
                );
                match self.attempt(&request, &catalog, &assembler, &notifier, published) {
                    Ok(post_id) => {
                        tracing::info!(
                            request = %request.id,
                            outcome = Outcome::Success.as_str(),
                            "request finished"
                        );
                        return Ok(post_id);
                    }
                    Err(Error::FatalTransport(message)) => {
                        self.alerts.send(
                            &format!("publish transport credentials rejected: {message}"),
                            &[],
                        );
                        return Err(Error::FatalTransport(message));
                    }
                    Err(error) => {
                        self.close_failed(&request, &error, &notifier, &mut counted_errors);
                    }
                }
            }
        }
        Ok(None)
    }

    /// The full pipeline for one request: preconditions, resolution,
    /// assembly, safety gate, publish, bookkeeping.
    fn attempt(
        &self,
        request: &Request,
        catalog: &[CatalogItem],
        assembler: &Assembler<'_>,
        notifier: &Notifier<'_>,
        published: bool,
    ) -> Result<Option<String>> {
        // Preconditions cost nothing; run them before touching any media.
        if self.db.is_blocked(&request.user)? {
            return Err(Error::BlockedUser);
        }
        self.enforce_length(request)?;
        self.scan_banned_terms(request)?;

        let (request, discovered) = self.discover_if_metadata(request)?;

        let (frames, items) = if request.is_parallel() {
            let mut pairs = Vec::new();
            for (query, token) in parse_siblings(&request)? {
                let item = find_item(catalog, &query, request.is_episode)?;
                self.check_resting(&item)?;
                pairs.push((item, token));
            }
            let items: Vec<CatalogItem> = pairs.iter().map(|(item, _)| item.clone()).collect();
            (representative_frames(self.source, &pairs)?, items)
        } else {
            let item = match discovered {
                Some(item) => item,
                None => find_item(catalog, &request.movie, request.is_episode)?,
            };
            self.check_resting(&item)?;
            let frames = expand_tokens(self.source, &item, &request.content)?;
            (frames, vec![item])
        };

        let artifact = assembler.assemble(&request, frames)?;
        if let Some(alt) = &artifact.alt_title {
            tracing::info!(title = %alt, "parallel comparison assembled");
        }

        if !request.verified && published {
            gate(
                self.classifier,
                self.alerts,
                &request,
                &artifact.paths,
                self.config.nsfw_threshold,
            )?;
        }

        if !published {
            tracing::info!(
                request = %request.id,
                images = artifact.paths.len(),
                "dry-run: publish suppressed"
            );
            if let Err(err) = self.db.mark_used(&request.id) {
                tracing::error!(request = %request.id, error = %err, "mark_used failed");
            }
            return Ok(None);
        }

        let post_id =
            self.transport
                .publish_images(&artifact.paths, &artifact.description, true)?;

        // The post is out: nothing below may fail this attempt, or the loop
        // would move on and publish a second time. Bookkeeping commits
        // before any notification goes out.
        if let Err(err) = self.db.mark_used(&request.id) {
            tracing::error!(request = %request.id, error = %err, "mark_used failed");
        }
        for item in &items {
            if let Err(err) = self.db.record_usage(item, &request.user) {
                tracing::error!(item = %item.title, error = %err, "record_usage failed");
            }
        }
        if let Some(promo) = &self.config.promo_comment {
            if let Err(err) = self.transport.comment(&post_id, promo, None) {
                tracing::warn!(error = %err, "promo comment failed");
            }
        }
        notifier.notify_success(&request);
        Ok(Some(post_id))
    }

    /// Apply the failure taxonomy to one failed request.
    fn close_failed(
        &self,
        request: &Request,
        error: &Error,
        notifier: &Notifier<'_>,
        counted_errors: &mut usize,
    ) {
        let outcome = error.outcome();
        match outcome {
            // Left untouched: silently retried on the next scheduled run.
            Outcome::RestingMovie => {
                tracing::debug!(request = %request.id, "resting item, skipping");
            }
            // Left unused so a later run retries it, but counted: repeated
            // media faults are how a dead volume looks from here.
            Outcome::TransientIo => {
                tracing::warn!(request = %request.id, error = %error, "transient media fault");
                *counted_errors += 1;
            }
            Outcome::BlockedUser
            | Outcome::NsfwRejected
            | Outcome::TooLong
            | Outcome::GenericFailure => {
                tracing::warn!(
                    request = %request.id,
                    outcome = outcome.as_str(),
                    error = %error,
                    "closing request"
                );
                if let Err(db_err) = self.db.mark_used(&request.id) {
                    tracing::error!(request = %request.id, error = %db_err, "mark_used failed");
                }
                if matches!(error, Error::OffensiveRequest) {
                    if let Err(db_err) = self.db.block_user(&request.user) {
                        tracing::error!(user = %request.user, error = %db_err, "block_user failed");
                    }
                }
                if outcome == Outcome::GenericFailure {
                    *counted_errors += 1;
                }
                notifier.notify_failure(request, error);
            }
            Outcome::Success => unreachable!("success is not a failure"),
        }
    }

    fn enforce_length(&self, request: &Request) -> Result<()> {
        if request.content.len() > self.config.max_tokens
            || request
                .content
                .iter()
                .any(|token| token.len() > self.config.max_token_len)
        {
            return Err(Error::TooLongRequest);
        }
        Ok(())
    }

    fn scan_banned_terms(&self, request: &Request) -> Result<()> {
        let comment = request.comment.to_lowercase();
        if self
            .config
            .banned_terms
            .iter()
            .any(|term| !term.is_empty() && comment.contains(&term.to_lowercase()))
        {
            return Err(Error::OffensiveRequest);
        }
        Ok(())
    }

    fn check_resting(&self, item: &CatalogItem) -> Result<()> {
        if self.db.recently_served(item, self.config.resting_hours)? {
            return Err(Error::RestingMovie);
        }
        Ok(())
    }

    /// Metadata commands (`!year 1979`) discover a non-resting catalog item
    /// matching the field, pick a representative subtitle line, and rewrite
    /// themselves into an ordinary quote request against that item.
    fn discover_if_metadata(&self, request: &Request) -> Result<(Request, Option<CatalogItem>)> {
        let CommandType::Metadata(field) = request.command else {
            return Ok((request.clone(), None));
        };
        if request.content.len() != 1 {
            return Err(Error::BadKeywords);
        }
        let value = match &request.content[0] {
            ContentToken::Quote(value) => value.clone(),
            ContentToken::Minute(_) => return Err(Error::BadKeywords),
        };

        let mut discovered = None;
        for candidate in self.db.discover(field, &value)? {
            if !self.db.recently_served(&candidate, self.config.resting_hours)? {
                discovered = Some(candidate);
                break;
            }
        }
        let item = discovered
            .ok_or_else(|| Error::NotFound(format!("{} {value}", field.as_str())))?;
        let quote = self.source.random_quote(&item)?;
        tracing::info!(
            request = %request.id,
            item = %item.title,
            "metadata command discovered an item"
        );

        let mut rewritten = request.clone();
        rewritten.movie = item.short_title();
        rewritten.content = vec![ContentToken::Quote(quote)];
        rewritten.command = CommandType::QuoteRequest;
        Ok((rewritten, Some(item)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::composer::tests::FakeSource;
    use crate::db::tests::{sample_movie, temp_db_path};
    use crate::notify::tests::{PublishFailure, RecordingTransport};
    use crate::safety::tests::{FakeClassifier, RecordingAlerts};

    struct Harness {
        config: Config,
        db: RequestDb,
        db_path: PathBuf,
        _scratch: tempfile::TempDir,
    }

    impl Harness {
        fn new(name: &str) -> Self {
            let db_path = temp_db_path(name);
            let _ = std::fs::remove_file(&db_path);
            let db = RequestDb::open(&db_path).unwrap();
            let scratch = tempfile::tempdir().unwrap();
            let config = Config {
                scratch_dir: scratch.path().to_path_buf(),
                ..Config::default()
            };

            let mut taxi = sample_movie("Taxi Driver");
            taxi.id = db.add_movie(&taxi).unwrap();
            let mut stalker = sample_movie("Stalker");
            stalker.year = Some(1979);
            stalker.director = Some("Andrei Tarkovsky".to_string());
            stalker.id = db.add_movie(&stalker).unwrap();

            Self {
                config,
                db,
                db_path,
                _scratch: scratch,
            }
        }

        fn movie(&self, title: &str) -> CatalogItem {
            self.db
                .list_movies()
                .unwrap()
                .into_iter()
                .find(|m| m.title == title)
                .unwrap()
        }

        fn add_request(&self, id: &str, command: &str, movie: &str, tokens: &[&str]) -> Request {
            let content: Vec<ContentToken> =
                tokens.iter().map(|t| ContentToken::parse(t)).collect();
            let request = Request {
                id: id.to_string(),
                user: "test.user".to_string(),
                comment: format!(
                    "{movie} {}",
                    tokens.iter().map(|t| format!("[{t}]")).collect::<Vec<_>>().join(" ")
                ),
                command: CommandType::parse(command, &content).unwrap(),
                content,
                movie: movie.to_string(),
                is_episode: false,
                parallel: Vec::new(),
                verified: false,
                used: false,
                priority: false,
            };
            let raw: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
            self.db.insert_request(&request, &raw).unwrap();
            request
        }

        fn insert(&self, request: &Request, tokens: &[&str]) {
            let raw: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
            self.db.insert_request(request, &raw).unwrap();
        }

        fn pending(&self) -> Vec<String> {
            let mut ids: Vec<String> = self
                .db
                .get_requests(RequestKind::Movies, false)
                .unwrap()
                .into_iter()
                .map(|r| r.id)
                .collect();
            ids.extend(
                self.db
                    .get_requests(RequestKind::Movies, true)
                    .unwrap()
                    .into_iter()
                    .map(|r| r.id),
            );
            ids
        }

        fn run_with(
            &self,
            source: &FakeSource,
            transport: &RecordingTransport,
            published: bool,
        ) -> Result<Option<String>> {
            let classifier = FakeClassifier { bad_score: 0.9 };
            let alerts = RecordingAlerts::default();
            Publisher::new(&self.config, &self.db, source, transport, &classifier, &alerts)
                .run(RequestKind::Movies, published)
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            std::fs::remove_file(&self.db_path).ok();
        }
    }

    #[test]
    fn test_success_stops_the_loop() {
        let h = Harness::new("success_stops");
        h.add_request("r1", "!req", "Taxi Driver", &["you talking to me?"]);
        h.add_request("r2", "!req", "Stalker", &["20:34"]);

        let source = FakeSource::default();
        let transport = RecordingTransport::default();
        let post = h.run_with(&source, &transport, true).unwrap();

        assert_eq!(post.as_deref(), Some("post_1"));
        assert_eq!(transport.publishes.borrow().len(), 1);
        // First request consumed, second untouched and still pending.
        assert_eq!(h.pending(), vec!["r2".to_string()]);
    }

    #[test]
    fn test_single_quote_single_image_no_collage() {
        let h = Harness::new("single_image");
        h.add_request("r1", "!req", "Taxi Driver", &["you talking to me?"]);

        let source = FakeSource::default();
        let transport = RecordingTransport::default();
        h.run_with(&source, &transport, true).unwrap();

        let publishes = transport.publishes.borrow();
        assert_eq!(publishes[0].0.len(), 1);
        assert_eq!(
            image::image_dimensions(&publishes[0].0[0]).unwrap(),
            (64, 36)
        );
    }

    #[test]
    fn test_too_long_request_closes_without_resolution() {
        let h = Harness::new("too_long");
        let tokens: Vec<String> = (0..21).map(|i| format!("2{}:0{}", i % 10, i % 6)).collect();
        let token_refs: Vec<&str> = tokens.iter().map(|t| t.as_str()).collect();
        h.add_request("r1", "!req", "Taxi Driver", &token_refs);

        let source = FakeSource::default();
        let transport = RecordingTransport::default();
        h.run_with(&source, &transport, true).unwrap();

        assert_eq!(*source.calls.borrow(), 0);
        assert!(h.pending().is_empty());
        assert!(transport.publishes.borrow().is_empty());
        let comments = transport.comments.borrow();
        assert_eq!(comments.len(), 1);
        assert!(comments[0].1.contains("too long"));
    }

    #[test]
    fn test_blocked_user_closes_silently_without_resolution() {
        let h = Harness::new("blocked");
        h.db.block_user("test.user").unwrap();
        h.add_request("r1", "!req", "Taxi Driver", &["20:34"]);

        let source = FakeSource::default();
        let transport = RecordingTransport::default();
        h.run_with(&source, &transport, true).unwrap();

        assert_eq!(*source.calls.borrow(), 0);
        assert!(h.pending().is_empty());
        assert!(transport.publishes.borrow().is_empty());
        assert!(transport.comments.borrow().is_empty());
    }

    #[test]
    fn test_resting_item_skipped_untouched() {
        let h = Harness::new("resting");
        let taxi = h.movie("Taxi Driver");
        h.db.record_usage(&taxi, "someone.else").unwrap();
        h.add_request("r1", "!req", "Taxi Driver", &["20:34"]);
        h.add_request("r2", "!req", "Stalker", &["21:03"]);

        let source = FakeSource::default();
        let transport = RecordingTransport::default();
        let post = h.run_with(&source, &transport, true).unwrap();

        // The resting request is passed over silently and the loop moves on.
        assert!(post.is_some());
        assert_eq!(h.pending(), vec!["r1".to_string()]);
        let publishes = transport.publishes.borrow();
        assert!(publishes[0].1.contains("Stalker"));
    }

    #[test]
    fn test_transient_io_leaves_request_unused() {
        let h = Harness::new("transient");
        h.add_request("r1", "!req", "Taxi Driver", &["20:34"]);
        h.add_request("r2", "!req", "Stalker", &["21:03"]);

        let source = FakeSource {
            missing_titles: vec!["Taxi Driver".to_string()],
            ..Default::default()
        };
        let transport = RecordingTransport::default();
        let post = h.run_with(&source, &transport, true).unwrap();

        assert!(post.is_some());
        // r1 stays pending for the next scheduled run; no failure notice.
        assert_eq!(h.pending(), vec!["r1".to_string()]);
        let comments = transport.comments.borrow();
        assert!(comments.iter().all(|(id, _)| id != "r1"));
    }

    #[test]
    fn test_generic_failure_notifies_and_closes() {
        let h = Harness::new("generic");
        h.add_request("r1", "!req", "Taxi Driver", &["nothing matches this"]);

        let source = FakeSource::default();
        let transport = RecordingTransport::default();
        let post = h.run_with(&source, &transport, true).unwrap();

        assert!(post.is_none());
        assert!(h.pending().is_empty());
        let comments = transport.comments.borrow();
        assert_eq!(comments.len(), 1);
        assert!(comments[0].1.contains("Kinobot returned an error"));
    }

    #[test]
    fn test_circuit_breaker_aborts_after_twenty_one_failures() {
        let h = Harness::new("breaker");
        for i in 0..25 {
            h.add_request(&format!("r{i:02}"), "!req", "Taxi Driver", &["nothing matches this"]);
        }

        let source = FakeSource::default();
        let transport = RecordingTransport::default();
        let post = h.run_with(&source, &transport, true).unwrap();

        assert!(post.is_none());
        // 21 counted failures close 21 requests; the rest survive untouched.
        assert_eq!(h.pending().len(), 4);
        assert_eq!(transport.comments.borrow().len(), 21);
    }

    #[test]
    fn test_dry_run_never_touches_the_transport() {
        let h = Harness::new("dry_run");
        h.add_request("r1", "!req", "Taxi Driver", &["you talking to me?"]);

        let source = FakeSource::default();
        let transport = RecordingTransport::default();
        let post = h.run_with(&source, &transport, false).unwrap();

        assert!(post.is_none());
        // Resolution and assembly ran; the backlog entry is consumed.
        assert!(*source.calls.borrow() > 0);
        assert!(h.pending().is_empty());
        assert!(transport.publishes.borrow().is_empty());
        assert!(transport.comments.borrow().is_empty());
    }

    #[test]
    fn test_idempotent_on_fully_used_backlog() {
        let h = Harness::new("idempotent");
        h.add_request("r1", "!req", "Taxi Driver", &["20:34"]);
        h.db.mark_used("r1").unwrap();

        let source = FakeSource::default();
        let transport = RecordingTransport::default();
        let post = h.run_with(&source, &transport, true).unwrap();

        assert!(post.is_none());
        assert_eq!(*source.calls.borrow(), 0);
        assert!(transport.publishes.borrow().is_empty());
        assert!(transport.comments.borrow().is_empty());
    }

    #[test]
    fn test_nsfw_trip_blocks_publish_and_alerts_once() {
        let h = Harness::new("nsfw");
        // The classifier fake trips on paths containing "bad"; the request
        // id lands in the scratch directory name.
        h.add_request("bad1", "!req", "Taxi Driver", &["20:34"]);

        let source = FakeSource::default();
        let transport = RecordingTransport::default();
        let classifier = FakeClassifier { bad_score: 0.9 };
        let alerts = RecordingAlerts::default();
        let post = Publisher::new(&h.config, &h.db, &source, &transport, &classifier, &alerts)
            .run(RequestKind::Movies, true)
            .unwrap();

        assert!(post.is_none());
        assert!(transport.publishes.borrow().is_empty());
        assert_eq!(alerts.calls.borrow().len(), 1);
        assert!(h.pending().is_empty());
        let comments = transport.comments.borrow();
        assert_eq!(comments.len(), 1);
        assert!(comments[0].1.contains("safety filter"));
    }

    #[test]
    fn test_verified_user_bypasses_the_gate() {
        let h = Harness::new("verified");
        let mut request = h.add_request("bad2", "!req", "Taxi Driver", &["20:34"]);
        // Re-insert as verified.
        h.db.mark_used("bad2").unwrap();
        request.id = "bad3".to_string();
        request.verified = true;
        h.insert(&request, &["20:34"]);

        let source = FakeSource::default();
        let transport = RecordingTransport::default();
        let post = h.run_with(&source, &transport, true).unwrap();

        assert!(post.is_some());
        assert_eq!(transport.publishes.borrow().len(), 1);
    }

    #[test]
    fn test_parallel_preserves_sibling_order() {
        let h = Harness::new("parallel");
        let request = Request {
            id: "p1".to_string(),
            user: "test.user".to_string(),
            comment: "!parallel Taxi Driver [20:34] | Stalker [21:03]".to_string(),
            command: CommandType::ParallelRequest,
            content: vec![ContentToken::parse("20:34")],
            movie: "Taxi Driver".to_string(),
            is_episode: false,
            parallel: vec![
                "Taxi Driver [20:34]".to_string(),
                "Stalker [21:03]".to_string(),
            ],
            verified: false,
            used: false,
            priority: false,
        };
        h.insert(&request, &["20:34"]);

        let source = FakeSource::default();
        let transport = RecordingTransport::default();
        let post = h.run_with(&source, &transport, true).unwrap();

        assert!(post.is_some());
        let publishes = transport.publishes.borrow();
        // Two siblings collapse into one collage; the synthesized title
        // keeps declaration order.
        assert_eq!(publishes[0].0.len(), 1);
        assert!(
            publishes[0]
                .1
                .contains("Taxi Driver (1976) | Stalker (1979)")
        );
    }

    #[test]
    fn test_offensive_request_blocks_the_user() {
        let h = Harness::new("offensive");
        let config = Config {
            scratch_dir: h.config.scratch_dir.clone(),
            banned_terms: vec!["awfulword".to_string()],
            ..Config::default()
        };

        let mut request =
            crate::db::tests::sample_request("r1", "Taxi Driver", &["20:34"]);
        request.comment = "Taxi Driver [20:34] awfulword".to_string();
        h.insert(&request, &["20:34"]);

        let source = FakeSource::default();
        let transport = RecordingTransport::default();
        let classifier = FakeClassifier { bad_score: 0.9 };
        let alerts = RecordingAlerts::default();
        let post = Publisher::new(&config, &h.db, &source, &transport, &classifier, &alerts)
            .run(RequestKind::Movies, true)
            .unwrap();

        assert!(post.is_none());
        assert!(h.db.is_blocked("test.user").unwrap());
        assert!(h.pending().is_empty());
        let comments = transport.comments.borrow();
        assert_eq!(comments.len(), 1);
        assert!(comments[0].1.contains("You are blocked"));
    }

    #[test]
    fn test_fatal_transport_aborts_the_run() {
        let h = Harness::new("fatal");
        h.add_request("r1", "!req", "Taxi Driver", &["20:34"]);
        h.add_request("r2", "!req", "Stalker", &["21:03"]);

        let source = FakeSource::default();
        let transport = RecordingTransport {
            publish_failure: Some(PublishFailure::Fatal),
            ..Default::default()
        };
        let classifier = FakeClassifier { bad_score: 0.9 };
        let alerts = RecordingAlerts::default();
        let result = Publisher::new(&h.config, &h.db, &source, &transport, &classifier, &alerts)
            .run(RequestKind::Movies, true);

        assert!(matches!(result, Err(Error::FatalTransport(_))));
        // The operator hears about it; the backlog survives for the retry.
        assert_eq!(alerts.calls.borrow().len(), 1);
        assert_eq!(h.pending().len(), 2);
    }

    #[test]
    fn test_generic_publish_failure_closes_and_continues() {
        let h = Harness::new("publish_generic");
        h.add_request("r1", "!req", "Taxi Driver", &["20:34"]);
        h.add_request("r2", "!req", "Stalker", &["21:03"]);

        let source = FakeSource::default();
        let transport = RecordingTransport {
            publish_failure: Some(PublishFailure::Generic),
            ..Default::default()
        };
        let post = h.run_with(&source, &transport, true).unwrap();

        // Unlike a credential fault, an ordinary transport error closes the
        // request and the loop keeps going.
        assert!(post.is_none());
        assert!(h.pending().is_empty());
        let comments = transport.comments.borrow();
        assert_eq!(comments.len(), 2);
        assert!(comments.iter().all(|(_, m)| m.contains("Kinobot returned an error")));
    }

    #[test]
    fn test_priority_backlog_runs_first() {
        let h = Harness::new("priority");
        h.add_request("normal", "!req", "Taxi Driver", &["20:34"]);
        let mut urgent = crate::db::tests::sample_request("urgent", "Stalker", &["21:03"]);
        urgent.priority = true;
        h.insert(&urgent, &["21:03"]);

        let source = FakeSource::default();
        let transport = RecordingTransport::default();
        let post = h.run_with(&source, &transport, true).unwrap();

        assert!(post.is_some());
        assert!(transport.publishes.borrow()[0].1.contains("Stalker"));
        assert_eq!(h.pending(), vec!["normal".to_string()]);
    }

    #[test]
    fn test_metadata_command_discovers_and_publishes() {
        let h = Harness::new("metadata");
        h.add_request("m1", "!year", "", &["1979"]);

        let source = FakeSource::default();
        let transport = RecordingTransport::default();
        let post = h.run_with(&source, &transport, true).unwrap();

        assert!(post.is_some());
        let publishes = transport.publishes.borrow();
        assert!(publishes[0].1.contains("Stalker"));
        assert!(h.pending().is_empty());
    }

    #[test]
    fn test_metadata_command_requires_exactly_one_keyword() {
        let h = Harness::new("bad_keywords");
        h.add_request("m1", "!year", "", &["1979", "1980"]);

        let source = FakeSource::default();
        let transport = RecordingTransport::default();
        let post = h.run_with(&source, &transport, true).unwrap();

        assert!(post.is_none());
        assert_eq!(*source.calls.borrow(), 0);
        assert!(h.pending().is_empty());
    }

    #[test]
    fn test_chain_expands_into_multi_image_set() {
        let h = Harness::new("chain");
        h.add_request("c1", "!req", "Taxi Driver", &["an exchange"]);

        let source = FakeSource {
            chain_quotes: vec!["an exchange".to_string()],
            chain_len: 4,
            ..Default::default()
        };
        let transport = RecordingTransport::default();
        let post = h.run_with(&source, &transport, true).unwrap();

        assert!(post.is_some());
        // Four chained frames stay a multi-image set, no collage.
        assert_eq!(transport.publishes.borrow()[0].0.len(), 4);
    }
}
