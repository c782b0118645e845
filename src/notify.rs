//! Requester notifications.
//!
//! Strictly best-effort: by the time a notification goes out the request's
//! bookkeeping is already committed, so a failure here (the original
//! comment thread was deleted, rate limits, anything) is logged and
//! swallowed, never re-raised. Dry runs log instead of posting.

use crate::config::Config;
use crate::error::Error;
use crate::facebook::PublishTransport;
use crate::types::{Outcome, Request};

pub(crate) struct Notifier<'a> {
    transport: &'a dyn PublishTransport,
    config: &'a Config,
    published: bool,
}

impl<'a> Notifier<'a> {
    pub(crate) fn new(
        transport: &'a dyn PublishTransport,
        config: &'a Config,
        published: bool,
    ) -> Self {
        Self {
            transport,
            config,
            published,
        }
    }

    pub(crate) fn notify_success(&self, request: &Request) {
        let message = format!(
            "202: Your request was successfully executed.\n\
             Check the complete list of movies: {}",
            self.config.website
        );
        self.reply(request, &message);
    }

    /// One notification per terminal failure, with the wording picked by the
    /// failure class. Non-terminal classes (resting, transient media faults)
    /// stay silent: those requests are retried on a later run.
    pub(crate) fn notify_failure(&self, request: &Request, error: &Error) {
        let message = match error {
            Error::OffensiveRequest => {
                "An offensive word has been detected when processing your request. \
                 You are blocked.\n\nSend a PM if you believe this was accidental."
                    .to_string()
            }
            Error::NsfwContent => {
                "Your request was rejected by the content safety filter. \
                 Nothing was published."
                    .to_string()
            }
            Error::TooLongRequest => format!(
                "Your request is too long. Please check the instructions \
                 before making a request: {}",
                self.config.website
            ),
            _ => match error.outcome() {
                Outcome::RestingMovie | Outcome::TransientIo | Outcome::BlockedUser => return,
                _ => format!(
                    "Kinobot returned an error: {error}. Please, don't forget to \
                     check the list of available films and instructions before \
                     making a request: {}",
                    self.config.website
                ),
            },
        };
        self.reply(request, &message);
    }

    fn reply(&self, request: &Request, message: &str) {
        if !self.published {
            tracing::info!(request = %request.id, "dry-run: notification suppressed");
            return;
        }
        if let Err(err) = self.transport.comment(&request.id, message, None) {
            // Happens when the user deletes the comment thread.
            tracing::info!(request = %request.id, error = %err, "notification not delivered");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::path::{Path, PathBuf};

    use crate::error::Result;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum PublishFailure {
        Fatal,
        Generic,
    }

    /// Transport fake recording publishes and comments; failure modes are
    /// injected per test.
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub(crate) publishes: RefCell<Vec<(Vec<PathBuf>, String, bool)>>,
        pub(crate) comments: RefCell<Vec<(String, String)>>,
        pub(crate) publish_failure: Option<PublishFailure>,
        pub(crate) fail_comments: bool,
    }

    impl PublishTransport for RecordingTransport {
        fn publish_images(
            &self,
            paths: &[PathBuf],
            description: &str,
            published: bool,
        ) -> Result<String> {
            match self.publish_failure {
                Some(PublishFailure::Fatal) => {
                    Err(Error::FatalTransport("bad token".to_string()))
                }
                Some(PublishFailure::Generic) => Err(Error::Http("boom".to_string())),
                None => {
                    self.publishes.borrow_mut().push((
                        paths.to_vec(),
                        description.to_string(),
                        published,
                    ));
                    Ok(format!("post_{}", self.publishes.borrow().len()))
                }
            }
        }

        fn comment(
            &self,
            object_id: &str,
            message: &str,
            _attachment: Option<&Path>,
        ) -> Result<()> {
            if self.fail_comments {
                return Err(Error::Http("comment thread deleted".to_string()));
            }
            self.comments
                .borrow_mut()
                .push((object_id.to_string(), message.to_string()));
            Ok(())
        }
    }

    fn request() -> Request {
        crate::db::tests::sample_request("r1", "Taxi Driver", &["20:34"])
    }

    #[test]
    fn test_success_notification_reaches_the_thread() {
        let transport = RecordingTransport::default();
        let config = Config::default();
        let notifier = Notifier::new(&transport, &config, true);
        notifier.notify_success(&request());

        let comments = transport.comments.borrow();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].0, "r1");
        assert!(comments[0].1.starts_with("202:"));
    }

    #[test]
    fn test_dry_run_suppresses_notifications() {
        let transport = RecordingTransport::default();
        let config = Config::default();
        let notifier = Notifier::new(&transport, &config, false);
        notifier.notify_success(&request());
        notifier.notify_failure(&request(), &Error::NotFound("x".to_string()));
        assert!(transport.comments.borrow().is_empty());
    }

    #[test]
    fn test_transient_classes_stay_silent() {
        let transport = RecordingTransport::default();
        let config = Config::default();
        let notifier = Notifier::new(&transport, &config, true);
        notifier.notify_failure(&request(), &Error::RestingMovie);
        notifier.notify_failure(&request(), &Error::Timeout(1000));
        notifier.notify_failure(&request(), &Error::BlockedUser);
        assert!(transport.comments.borrow().is_empty());
    }

    #[test]
    fn test_failure_wordings() {
        let transport = RecordingTransport::default();
        let config = Config::default();
        let notifier = Notifier::new(&transport, &config, true);

        notifier.notify_failure(&request(), &Error::OffensiveRequest);
        notifier.notify_failure(&request(), &Error::NsfwContent);
        notifier.notify_failure(&request(), &Error::NotFound("a quote".to_string()));

        let comments = transport.comments.borrow();
        assert_eq!(comments.len(), 3);
        assert!(comments[0].1.contains("You are blocked"));
        assert!(comments[1].1.contains("safety filter"));
        assert!(comments[2].1.contains("Kinobot returned an error"));
    }

    #[test]
    fn test_delivery_failure_is_swallowed() {
        let transport = RecordingTransport {
            fail_comments: true,
            ..Default::default()
        };
        let config = Config::default();
        let notifier = Notifier::new(&transport, &config, true);
        // Must not panic or propagate.
        notifier.notify_success(&request());
        notifier.notify_failure(&request(), &Error::NotFound("x".to_string()));
    }
}
