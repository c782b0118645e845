//! Chain and parallel composition.
//!
//! Expands per-token resolutions into the flat frame sequence the assembler
//! consumes: chain signals become ordered runs in place, parallel siblings
//! become one representative frame each, in declaration order.

use crate::error::{Error, Result};
use crate::resolver::parse_comment;
use crate::source::{FrameSource, Resolution};
use crate::types::{CatalogItem, ContentToken, Frame, Request};

/// Resolve a request's tokens against one item, expanding chains in place.
/// Token order is preserved; a chain run replaces its single frame.
pub(crate) fn expand_tokens(
    source: &dyn FrameSource,
    item: &CatalogItem,
    tokens: &[ContentToken],
) -> Result<Vec<Frame>> {
    let mut frames = Vec::with_capacity(tokens.len());
    for token in tokens {
        match source.resolve(item, token, false)? {
            Resolution::Single(frame) => frames.push(frame),
            Resolution::Chain(run) => frames.extend(run),
            Resolution::ChainDetected => {
                tracing::debug!(token = %token.discriminator(), "chain detected, expanding");
                match source.resolve(item, token, true)? {
                    Resolution::Chain(run) => frames.extend(run),
                    Resolution::Single(frame) => frames.push(frame),
                    Resolution::ChainDetected => {
                        return Err(Error::NotFound(format!(
                            "decoder kept signaling a chain for '{}'",
                            token.discriminator()
                        )));
                    }
                }
            }
        }
    }
    Ok(frames)
}

/// Split a parallel request's sibling comments into item queries and their
/// single content token. Parallel mode forces single-content resolution, so
/// only the first bracketed token of each sibling counts.
pub(crate) fn parse_siblings(request: &Request) -> Result<Vec<(String, ContentToken)>> {
    let mut siblings = Vec::with_capacity(request.parallel.len());
    for comment in &request.parallel {
        let (query, raw_tokens) = parse_comment(comment);
        let first = raw_tokens
            .first()
            .ok_or_else(|| Error::NotFound(format!("no content in sibling '{comment}'")))?;
        if query.is_empty() {
            return Err(Error::NotFound(format!("no title in sibling '{comment}'")));
        }
        siblings.push((query, ContentToken::parse(first)));
    }
    Ok(siblings)
}

/// One representative frame per sibling, in sibling order. This order is the
/// final display order; it is never re-ranked. A sibling whose token expands
/// to a chain contributes its first frame.
pub(crate) fn representative_frames(
    source: &dyn FrameSource,
    pairs: &[(CatalogItem, ContentToken)],
) -> Result<Vec<Frame>> {
    let mut frames = Vec::with_capacity(pairs.len());
    for (item, token) in pairs {
        let frame = match source.resolve(item, token, false)? {
            Resolution::Single(frame) => frame,
            Resolution::Chain(mut run) => {
                if run.is_empty() {
                    return Err(Error::NotFound(token.discriminator()));
                }
                run.remove(0)
            }
            Resolution::ChainDetected => match source.resolve(item, token, true)? {
                Resolution::Chain(mut run) if !run.is_empty() => run.remove(0),
                _ => return Err(Error::NotFound(token.discriminator())),
            },
        };
        frames.push(frame);
    }
    Ok(frames)
}
