//! Statically defined metrics of the client core.

use pdc_telemetry::declare_static_counter;

declare_static_counter!(TRANSFERS_SUBMITTED, "transfers_submitted");
declare_static_counter!(TRANSFERS_FAILED, "transfers_failed");
declare_static_counter!(QUERIES_EVALUATED, "queries_evaluated");
