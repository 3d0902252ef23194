//! Cursor pagination over interaction queries.

use anyhow::{bail, Result};

use weave_types::ContractId;

use crate::client::{LedgerClient, TxMetadata};

/// Maximum items per query page (the gateway's server limit).
pub const MAX_PAGE_SIZE: u32 = 50;

/// Drain every page of an interaction query into one vector.
///
/// Callers see a complete sequence; how many round-trips it took is an
/// implementation detail. A cursor that repeats indicates a misbehaving
/// gateway and aborts rather than looping forever.
pub async fn drain_interactions(
    client: &dyn LedgerClient,
    contract_id: &ContractId,
    from_height: u64,
    to_height: u64,
    page_size: u32,
) -> Result<Vec<TxMetadata>> {
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = client
            .query_interactions(contract_id, from_height, to_height, cursor.clone(), page_size)
            .await?;
        pages += 1;
        items.extend(page.items);

        match page.next_cursor {
            None => break,
            Some(next) => {
                if Some(&next) == cursor.as_ref() {
                    bail!(
                        "interaction query returned a repeating cursor {:?} after {} pages",
                        next,
                        pages
                    );
                }
                cursor = Some(next);
            }
        }
    }

    tracing::debug!(
        contract = %contract_id,
        from_height,
        to_height,
        pages,
        total = items.len(),
        "drained interaction query"
    );
    Ok(items)
}
