//! Digital output command path.
//!
//! A write to one output channel is a read-modify-write against the
//! controller's combined output register: read the register from a fresh
//! snapshot, compute the masked write, send it.  The link session stays
//! locked across all three steps so the monitor cannot interleave a receive.

use tracing::{info, warn};
use urbridge_hal::{MaskedWrite, encode};
use urbridge_types::{BridgeError, DigitalOutputRequest, OutputBank, StateField};

use crate::lifecycle::LifecycleController;

/// Drive one digital output channel to the requested value.
///
/// # Errors
///
/// - [`BridgeError::InvalidCommand`] for an unknown bank offset, a channel
///   outside `0..=7`, or a value other than `0`/`1`.  Checked before the link
///   is touched.
/// - [`BridgeError::NotRunning`] when monitoring is not active.
/// - [`BridgeError::Timeout`] when the command does not finish within the
///   configured command timeout.
/// - Any link failure while reading or writing.
pub async fn set_digital_output(
    lifecycle: &LifecycleController,
    request: DigitalOutputRequest,
) -> Result<MaskedWrite, BridgeError> {
    let bank = OutputBank::from_offset(request.offset)?;
    encode(0, request.digital_output, request.value, bank)?;

    let link = lifecycle.active_link().await.ok_or(BridgeError::NotRunning)?;
    let timeout = lifecycle.config().command_timeout;

    let result = tokio::time::timeout(timeout, async {
        let mut session = link.lock().await;
        let state = session.read_fresh().await?.ok_or(BridgeError::ConnectionLost)?;
        let current = state
            .actual_digital_output_bits
            .ok_or(BridgeError::FieldMissing(StateField::DigitalOutputBits))?;
        let write = encode(current, request.digital_output, request.value, bank)?;
        session
            .send(
                bank.group(),
                &[bank.mask_field(), bank.value_field()],
                &[u64::from(write.mask), u64::from(write.value)],
            )
            .await?;
        Ok::<_, BridgeError>(write)
    })
    .await
    .map_err(|_| BridgeError::Timeout(format!("digital output command exceeded {timeout:?}")))?;

    match &result {
        Ok(write) => info!(
            bank = bank.group(),
            channel = request.digital_output,
            value = request.value,
            mask = write.mask,
            "digital output written"
        ),
        Err(e) => warn!(error = %e, channel = request.digital_output, "digital output command failed"),
    }
    result
}
