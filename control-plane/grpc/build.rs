fn main() {
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&["proto/operations.proto"], &["proto"])
        .expect("operations protobuf compilation failed");
}
