use drive_proxy::api::drive::{MemoryDrive, RemoteFileService};
use drive_proxy::config::{ProxyConfig, ServiceConfig};
use drive_proxy::logging::LogSettings;
use drive_proxy::pipe::{
    new_redirect_guid, well_known_name, PipeClient, PipeServer, RequestHandler,
};
use drive_proxy::service::{Service, ServiceContext};
use drive_proxy::ProxyResult;
use interprocess::local_socket::{prelude::*, GenericNamespaced, Stream};
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

struct Echo;

impl RequestHandler for Echo {
    fn handle(&self, args: Vec<String>) -> String {
        args.join("|")
    }
}

fn unique_config() -> ServiceConfig {
    ServiceConfig {
        pipe_name: format!("DriveProxyTest{}", &new_redirect_guid()[..12]),
        client_timeout_secs: 10,
        redirect_accept_timeout_secs: 5,
        request_read_timeout_secs: 2,
        ..ServiceConfig::default()
    }
}

fn start_server(
    config: &ServiceConfig,
    handler: Arc<dyn RequestHandler>,
) -> JoinHandle<ProxyResult<()>> {
    let server = PipeServer::new(config, handler);
    thread::spawn(move || server.run())
}

#[test]
fn control_messages_and_redirected_calls() {
    let config = unique_config();
    let runner = start_server(&config, Arc::new(Echo));
    let client = PipeClient::new(&config);

    client.ping().unwrap();
    assert!(client.process_count().unwrap() >= 1);
    assert_eq!(client.execute(&["Echo", "a", "b"]).unwrap(), "Echo|a|b");

    let guid = client.redirect().unwrap();
    assert_eq!(guid.len(), new_redirect_guid().len());

    client.close().unwrap();
    client.ping().unwrap();

    client.shutdown().unwrap();
    runner.join().unwrap().unwrap();
}

#[test]
fn concurrent_calls_get_their_own_replies() {
    let config = unique_config();
    let runner = start_server(&config, Arc::new(Echo));
    let client = PipeClient::new(&config);
    client.ping().unwrap();

    let callers: Vec<_> = (0..4)
        .map(|n| {
            let client = client.clone();
            thread::spawn(move || client.execute(&["Call".to_string(), n.to_string()]))
        })
        .collect();
    for (n, caller) in callers.into_iter().enumerate() {
        assert_eq!(caller.join().unwrap().unwrap(), format!("Call|{n}"));
    }

    client.shutdown().unwrap();
    runner.join().unwrap().unwrap();
}

#[test]
fn busy_pool_refuses_redirect_without_blocking_the_listener() {
    let config = ServiceConfig {
        max_sessions: 1,
        ..unique_config()
    };
    let runner = start_server(&config, Arc::new(Echo));
    let client = PipeClient::new(&config);
    client.ping().unwrap();

    // 拿到私有管道但不连接，工作线程一直占着唯一的名额
    client.redirect().unwrap();
    let refused = client.redirect().unwrap_err();
    assert!(refused.to_string().contains("busy"), "{refused}");

    client.ping().unwrap();
    client.shutdown().unwrap();
    runner.join().unwrap().unwrap();
}

#[test]
fn silent_client_does_not_stall_the_listener() {
    let config = unique_config();
    let runner = start_server(&config, Arc::new(Echo));
    let client = PipeClient::new(&config);
    client.ping().unwrap();

    let name = well_known_name(&config.pipe_name);
    let ns_name = name.as_str().to_ns_name::<GenericNamespaced>().unwrap();
    let silent = Stream::connect(ns_name).unwrap();
    client.ping().unwrap();
    assert_eq!(client.execute(&["Echo", "after"]).unwrap(), "Echo|after");
    drop(silent);

    client.shutdown().unwrap();
    runner.join().unwrap().unwrap();
}

#[test]
fn no_server_means_connect_error() {
    let client = PipeClient::new(&unique_config()).with_connect_retries(1);
    assert!(client.ping().is_err());
}

#[test]
fn download_over_the_pipe() {
    let dir = tempfile::tempdir().unwrap();
    let drive = Arc::new(MemoryDrive::new(dir.path().join("mirror")));
    let id = drive.add_file(&drive.root_id(), "hello.txt", b"hello over the pipe");

    let mut config = ProxyConfig::default();
    config.service = unique_config();
    let log = Arc::new(LogSettings::detached(&config.log));
    let service_drive: Arc<dyn RemoteFileService> = drive.clone();
    let ctx = Arc::new(ServiceContext::new(config.clone(), service_drive, log, None));
    let runner = start_server(&config.service, Arc::new(Service::new(ctx)));

    let client = PipeClient::new(&config.service);
    let reply = client.execute(&["DownloadFile", id.as_str()]).unwrap();
    assert!(reply.starts_with("<File"), "{reply}");
    assert!(reply.contains("Title=\"hello.txt\""), "{reply}");
    let local = drive.get_file(&id).unwrap().file_path.unwrap();
    assert_eq!(std::fs::read(local).unwrap(), b"hello over the pipe");

    let reply = client.execute(&["NoSuchMethod"]).unwrap();
    assert!(reply.contains("Type=\"Dispatch\""), "{reply}");

    client.shutdown().unwrap();
    runner.join().unwrap().unwrap();
}
