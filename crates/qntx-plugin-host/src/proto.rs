//! Generated gRPC types and service traits for the plugin protocol (§6).

tonic::include_proto!("qntx.plugin.v1");
