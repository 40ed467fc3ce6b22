fn main() {
    tonic_build::configure()
        .build_server(true)
        .build_client(false)
        .compile(&["proto/csi.proto"], &["proto"])
        .expect("csi protobuf compilation failed");
}
