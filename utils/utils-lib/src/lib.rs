pub mod tracing_telemetry;
