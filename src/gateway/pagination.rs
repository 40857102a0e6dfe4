use std::future::Future;

/// Drain a page-numbered listing into one vector.
///
/// Pages are 1-based. Fetching stops after the first short or empty page, or
/// after `max_pages` pages when the backend keeps returning full ones. The
/// first failing page aborts the whole aggregate; pages gathered so far are
/// dropped with it.
pub async fn collect_pages<T, E, F, Fut>(
    page_size: usize,
    max_pages: usize,
    mut fetch: F,
) -> Result<Vec<T>, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<T>, E>>,
{
    let mut all = Vec::new();

    for page in 1..=max_pages {
        let items = fetch(page).await?;
        let len = items.len();
        all.extend(items);

        if len < page_size {
            return Ok(all);
        }
    }

    tracing::warn!(
        max_pages,
        collected = all.len(),
        "pagination stopped at page limit; listing may be truncated"
    );
    Ok(all)
}
