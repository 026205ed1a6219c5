//! Test utilities for spinning up a real Redis instance via testcontainers.

use testcontainers::{
    core::{ContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage,
};

use crate::RedisStore;

/// Spin up a Redis container and return the container handle, its URI and a
/// connected `RedisStore`.
///
/// The container is stopped when `ContainerAsync` is dropped, so callers must
/// hold it for the duration of the test.
pub async fn redis_container() -> (ContainerAsync<GenericImage>, String, RedisStore) {
    let image = GenericImage::new("redis", "7.2-alpine")
        .with_exposed_port(ContainerPort::Tcp(6379))
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));

    let container: ContainerAsync<GenericImage> = image
        .start()
        .await
        .expect("Failed to start Redis container");

    let host_port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get Redis host port");

    let uri = format!("redis://127.0.0.1:{host_port}");
    let store = RedisStore::connect(&uri)
        .await
        .expect("Failed to connect to Redis");

    (container, uri, store)
}
