use drive_proxy::api::drive::{MemoryDrive, RemoteFileService, FOLDER_MIME_TYPE};
use drive_proxy::config::ProxyConfig;
use drive_proxy::db::Database;
use drive_proxy::logging::LogSettings;
use drive_proxy::service::{MethodId, Service, ServiceContext};
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    drive: Arc<MemoryDrive>,
    service: Service,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let drive = Arc::new(MemoryDrive::new(dir.path().join("mirror")));
    let db = Database::open(dir.path().join("proxy.db")).unwrap();
    let config = ProxyConfig::default();
    let log = Arc::new(LogSettings::detached(&config.log));
    let service_drive: Arc<dyn RemoteFileService> = drive.clone();
    let ctx = ServiceContext::new(config, service_drive, log, Some(db));
    Fixture {
        _dir: dir,
        drive,
        service: Service::new(Arc::new(ctx)),
    }
}

#[test]
fn unknown_method_lists_the_catalog() {
    let f = fixture();
    let reply = f.service.execute(&["Frobnicate", "x"]);
    assert!(reply.starts_with("<Error Type=\"Dispatch\""), "{reply}");
    for id in MethodId::ALL {
        assert!(reply.contains(&format!("Name=\"{}\"", id.as_str())), "{reply}");
    }
    assert!(reply.contains("Type=\"String[]\""));

    let empty: [&str; 0] = [];
    assert!(f.service.execute(&empty).contains("<Methods>"));
}

#[test]
fn handler_errors_omit_the_catalog() {
    let f = fixture();
    let reply = f.service.execute(&["RenameFile", "mem-1"]);
    assert!(reply.contains("Type=\"InvalidArgument\""), "{reply}");
    assert!(!reply.contains("<Methods>"));

    let reply = f.service.execute(&["GetFiles", "missing"]);
    assert!(reply.contains("Type=\"NotFound\""), "{reply}");
}

#[test]
fn get_log_reports_and_persists_level() {
    let f = fixture();
    let reply = f.service.execute(&["GetLog"]);
    assert!(reply.starts_with("<Log Level=\"info\""), "{reply}");

    let reply = f.service.execute(&["GetLog", "debug"]);
    assert!(reply.contains("Level=\"debug\""), "{reply}");
    assert_eq!(
        f.service.context().persisted_log_level().as_deref(),
        Some("debug")
    );

    let reply = f.service.execute(&["GetLog", "drive_proxy=loudest"]);
    assert!(reply.contains("Type=\"InvalidArgument\""), "{reply}");
    assert_eq!(f.service.context().log().current().level, "debug");
}

#[test]
fn methods_resolve_by_debug_prefix_number_and_case() {
    let f = fixture();
    let about = f.service.execute(&["Debug", "GetAbout"]);
    assert!(about.starts_with("<About"), "{about}");
    assert_eq!(f.service.execute(&["14"]), about);
    assert_eq!(f.service.execute(&["getabout"]), about);
}

#[test]
fn get_files_with_and_without_the_folder() {
    let f = fixture();
    let root = f.drive.root_id();
    f.drive.add_file(&root, "a.txt", b"a");
    f.drive.add_folder(&root, "Docs");

    let reply = f.service.execute(&["GetFiles", root.as_str()]);
    assert!(reply.starts_with("<Files Count=\"3\">"), "{reply}");
    let reply = f.service.execute(&["GetFiles", root.as_str(), "true"]);
    assert!(reply.starts_with("<Files Count=\"2\">"), "{reply}");
    assert!(!reply.contains("IsRoot=\"true\""));
}

#[test]
fn file_methods_end_to_end() {
    let f = fixture();
    let root = f.drive.root_id();
    let docs = f.drive.add_folder(&root, "Docs");
    let readme = f.drive.add_file(&docs, "readme.txt", b"read me");

    let reply = f.service.execute(&["DownloadFile", readme.as_str()]);
    assert!(reply.contains("Title=\"readme.txt\""), "{reply}");
    let local = f.drive.get_file(&readme).unwrap().file_path.unwrap();
    assert_eq!(std::fs::read(&local).unwrap(), b"read me");

    let reply = f.service.execute(&["GetFilesFromPath", "Docs/readme.txt"]);
    assert!(reply.contains(&format!("Id=\"{readme}\"")), "{reply}");
    let absolute = local.display().to_string();
    let reply = f.service.execute(&["GetFilesFromPath", absolute.as_str()]);
    assert!(reply.contains(&format!("Id=\"{readme}\"")), "{reply}");

    let first = f.service.execute(&["InsertFile", docs.as_str(), "notes.txt"]);
    assert!(first.contains("Title=\"notes.txt\""), "{first}");
    let second = f.service.execute(&["InsertFile", docs.as_str(), "notes.txt"]);
    assert!(second.contains("Title=\"notes (1).txt\""), "{second}");
    let folder = f
        .service
        .execute(&["InsertFile", docs.as_str(), "Archive", FOLDER_MIME_TYPE]);
    assert!(folder.contains("IsFolder=\"true\""), "{folder}");

    let reply = f.service.execute(&["RenameFile", readme.as_str(), "README.md"]);
    assert!(reply.contains("Title=\"README.md\""), "{reply}");

    let reply = f.service.execute(&["MoveFiles", root.as_str(), readme.as_str()]);
    assert!(reply.starts_with("<Files Count=\"1\">"), "{reply}");
    assert!(reply.contains(&format!("ParentId=\"{root}\"")), "{reply}");

    let reply = f.service.execute(&["CopyFiles", docs.as_str(), readme.as_str()]);
    assert!(reply.starts_with("<Files Count=\"1\">"), "{reply}");

    let reply = f.service.execute(&["TrashFiles", readme.as_str()]);
    assert!(reply.contains("Trashed=\"true\""), "{reply}");
    let reply = f.service.execute(&["UntrashFiles", readme.as_str()]);
    assert!(reply.contains("Trashed=\"false\""), "{reply}");
}

#[test]
fn batch_stops_at_the_first_failure() {
    let f = fixture();
    let root = f.drive.root_id();
    let a = f.drive.add_file(&root, "a.txt", b"a");
    let b = f.drive.add_file(&root, "b.txt", b"b");

    let reply = f
        .service
        .execute(&["TrashFiles", a.as_str(), "missing", b.as_str()]);
    assert!(reply.contains("Type=\"NotFound\""), "{reply}");
    assert!(f.drive.get_file(&a).unwrap().trashed);
    assert!(!f.drive.get_file(&b).unwrap().trashed);
}

#[test]
fn authenticate_reports_the_account() {
    let f = fixture();
    let reply = f.service.execute(&["Authenticate"]);
    assert!(reply.contains("RootFolderId=\"root\""), "{reply}");

    f.drive.fail_on("get_about", "token expired");
    let reply = f.service.execute(&["Authenticate"]);
    assert!(reply.contains("token expired"), "{reply}");
}
