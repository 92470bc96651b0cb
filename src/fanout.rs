//! Points-change fan-out
//!
//! Turns one loyalty balance change into one wallet job per registered wallet of
//! the membership. Callers are the points and redemption flows, which must not
//! fail because a wallet update could not be queued.

use anyhow::Result;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::jobs::WalletJobPayload;
use crate::models::wallet_registration::{Model as Registration, WalletPlatform};
use crate::repositories::{WalletJobQueue, WalletRegistrationLedger};

/// Job payload for a registration, or `None` when the row lacks its wallet id.
fn payload_for(registration: &Registration, balance: i64) -> Option<WalletJobPayload> {
    match registration.wallet_platform()? {
        WalletPlatform::Google => registration
            .google_object_id
            .as_deref()
            .map(|object_id| WalletJobPayload::google_patch(object_id, balance)),
        WalletPlatform::Apple => registration.apple_serial_number.as_deref().map(|serial| {
            WalletJobPayload::apple_regenerate(serial, registration.apple_push_token.clone())
        }),
    }
}

/// Enqueue wallet updates for every registration of a membership.
///
/// Per-registration failures are logged and skipped. Returns the number of jobs
/// enqueued; only a failure to read the registrations is an error.
pub async fn enqueue_points_update(
    ledger: &WalletRegistrationLedger,
    queue: &WalletJobQueue,
    customer_program_id: Uuid,
    balance: i64,
) -> Result<usize> {
    let registrations = ledger.list_for_membership(customer_program_id).await?;
    let mut enqueued = 0;

    for registration in &registrations {
        let Some(payload) = payload_for(registration, balance) else {
            warn!(
                registration_id = %registration.id,
                platform = %registration.platform,
                "Registration has no wallet identifier, skipping"
            );
            continue;
        };

        match queue.enqueue(&payload).await {
            Ok(_) => enqueued += 1,
            Err(err) => warn!(
                registration_id = %registration.id,
                customer_program_id = %customer_program_id,
                error = %err,
                "Failed to enqueue wallet update"
            ),
        }
    }

    debug!(
        customer_program_id = %customer_program_id,
        registrations = registrations.len(),
        enqueued,
        "Points update fanned out"
    );

    Ok(enqueued)
}
