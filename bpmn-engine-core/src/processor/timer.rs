use crate::behavior::BpmnBehaviors;
use crate::error::ProcessingResult;
use crate::records::{Record, RecordValue};
use crate::types::*;
use tracing::debug;

/// Fire a due timer at its catch event.
pub(super) fn trigger_timer(b: &mut BpmnBehaviors<'_>, command: &Record) -> ProcessingResult<()> {
    let Some(timer) = b.state.timers.get(command.key) else {
        b.reject(
            command,
            &format!(
                "Expected to trigger timer with key '{}', but no such timer was found",
                command.key,
            ),
        );
        return Ok(());
    };
    let record = timer.record;
    b.append_event(
        timer.key,
        Intent::Timer(TimerIntent::Triggered),
        RecordValue::Timer(record.clone()),
    )?;

    let triggered = b.trigger_catch_event(
        record.element_instance_key,
        &record.target_element_id,
        Document::new(),
    )?;
    if !triggered {
        debug!(
            timer_key = timer.key,
            element_instance_key = record.element_instance_key,
            "Timer fired but its event scope refused the trigger"
        );
    }
    Ok(())
}
