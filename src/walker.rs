use crate::{
    error::Result,
    extract::{PageExtractor, QuestionRecord},
    session::Session,
};
use futures::{stream, Stream};
use tracing::info;

struct WalkState<'a> {
    session: &'a Session,
    extractor: &'a PageExtractor,
    next: Option<String>,
    remaining: usize,
    index: usize,
}

/// Follow "next" links from `start_url`, yielding one record per page.
///
/// The stream is finite: it ends after `budget` records, after a record without a next
/// link, or right after the first error.
pub fn walk<'a>(
    session: &'a Session,
    extractor: &'a PageExtractor,
    start_url: &str,
    budget: usize,
) -> impl Stream<Item = Result<QuestionRecord>> + 'a {
    let state = WalkState {
        session,
        extractor,
        next: Some(start_url.to_string()),
        remaining: budget,
        index: 0,
    };

    stream::unfold(state, |mut state| async move {
        if state.remaining == 0 {
            return None;
        }
        let url = state.next.take()?;
        state.remaining -= 1;
        state.index += 1;

        info!(page = state.index, %url, "scraping question page");
        match state.extractor.extract(state.session, &url).await {
            Ok(record) => {
                state.next = record.next_url.clone();
                if state.next.is_none() {
                    info!("no next link found, stopping");
                }
                Some((Ok(record), state))
            }
            // `next` stays empty so the stream ends after the error
            Err(e) => Some((Err(e), state)),
        }
    })
}
