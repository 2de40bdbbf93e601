use echo_service::{EchoServiceServer, FILE_DESCRIPTOR_SET};
use echo_service_impl::EchoServiceImpl;
use prost_reflect::DescriptorPool;
use protodesk_core::reflection::client::{ReflectionClient, ReflectionResolveError};
use tonic::Code;
use tonic_reflection::server::v1::ServerReflectionServer;


fn setup_reflection_client()
-> ReflectionClient<ServerReflectionServer<impl tonic_reflection::server::v1::ServerReflection>> {
    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()
        .expect("Failed to setup Reflection Service");

    ReflectionClient::new(reflection_service)
}

#[tokio::test]
async fn test_reflection_client_fetches_service_file_descriptor() {
    let mut client = setup_reflection_client();

    let fd_set = client
        .file_descriptor_set_by_symbol("echo.EchoService")
        .await
        .expect("Failed to fetch file descriptor set by symbol");

    // echo.proto pulls google/protobuf/any.proto in with it.
    let pool =
        DescriptorPool::from_file_descriptor_set(fd_set).expect("Failed to build descriptor pool");

    let service = pool
        .get_service_by_name("echo.EchoService")
        .expect("Failed to find service in file descriptor");

    let streaming: Vec<_> = service
        .methods()
        .map(|m| (m.name().to_string(), m.is_client_streaming(), m.is_server_streaming()))
        .collect();

    assert_eq!(
        streaming,
        vec![
            ("UnaryEcho".to_string(), false, false),
            ("ServerStreamingEcho".to_string(), false, true),
            ("ClientStreamingEcho".to_string(), true, false),
            ("BidirectionalEcho".to_string(), true, true),
            ("FailWithDetails".to_string(), false, false),
            ("SlowEcho".to_string(), false, false),
        ]
    );
    assert!(pool.get_message_by_name("google.protobuf.Any").is_some());
}

#[tokio::test]
async fn test_reflection_client_fetches_many_symbols_over_one_stream() {
    let mut client = setup_reflection_client();

    let fd_set = client
        .file_descriptor_set_by_symbols(&[
            "echo.EchoService".to_string(),
            "echo.ErrorDetail".to_string(),
        ])
        .await
        .expect("Failed to fetch file descriptor set by symbols");

    // Both symbols live in the same file, which is fetched once.
    let mut names: Vec<_> = fd_set.file.iter().filter_map(|f| f.name.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["echo.proto", "google/protobuf/any.proto"]);
}

#[tokio::test]
async fn test_reflection_client_lists_services() {
    let mut client = setup_reflection_client();

    let services = client
        .list_services()
        .await
        .expect("Failed to list services");

    assert!(services.contains(&"echo.EchoService".to_string()));
}

#[tokio::test]
async fn test_reflection_service_not_found_error() {
    let mut client = setup_reflection_client();

    let result = client
        .file_descriptor_set_by_symbol("non.existent.Service")
        .await;

    assert!(matches!(
        result,
        Err(ReflectionResolveError::ServerStreamFailure(status)) if status.code() == Code::NotFound
    ));
}

#[tokio::test]
async fn test_server_does_not_support_reflection() {
    // Only the echo service is hosted here.
    let server = EchoServiceServer::new(EchoServiceImpl);
    let mut client = ReflectionClient::new(server);

    let result = client.list_services().await;

    match result {
        Err(ReflectionResolveError::ServerStreamInitFailed(status)) => {
            assert_eq!(
                status.code(),
                Code::Unimplemented,
                "Expected UNIMPLEMENTED status, but got: {status:?}"
            );
        }
        Err(e) => panic!("Expected StreamInitFailed(Unimplemented), got: {e:?}"),
        Ok(_) => panic!("Expected error, but got a service list"),
    }
}
