#![allow(dead_code)]

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use fakultas_surat_server::convert::PdfConverter;
use fakultas_surat_server::pipeline::Pipeline;
use fakultas_surat_server::registry::{ActorRef, DocumentRegistry, InMemoryRegistry, Role};
use fakultas_surat_server::template::TemplateStore;
use fakultas_surat_server::workflow::{StaticDirectory, WorkflowEngine};
use fakultas_surat_server::AppState;
use zip::write::SimpleFileOptions;

/// Build a minimal but valid DOCX container whose document body is the
/// given WordprocessingML fragment.
pub fn docx(body: &str) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    writer.start_file("[Content_Types].xml", options).unwrap();
    writer
        .write_all(
            br#"<?xml version="1.0"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"/>"#,
        )
        .unwrap();

    writer.start_file("word/document.xml", options).unwrap();
    writer
        .write_all(
            format!(r#"<?xml version="1.0"?><w:document><w:body>{body}</w:body></w:document>"#)
                .as_bytes(),
        )
        .unwrap();

    writer.finish().unwrap().into_inner()
}

/// Extract `word/document.xml` from a rendered DOCX.
pub fn document_xml(bytes: &[u8]) -> String {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    let mut file = archive.by_name("word/document.xml").unwrap();
    let mut xml = String::new();
    std::io::Read::read_to_string(&mut file, &mut xml).unwrap();
    xml
}

pub fn actor(id: i64, name: &str, role: Role) -> ActorRef {
    ActorRef {
        id,
        name: name.to_string(),
        role,
    }
}

pub struct TestEnv {
    pub state: AppState,
    pub registry: Arc<dyn DocumentRegistry>,
    // Keep the directories alive for the duration of the test.
    pub template_dir: tempfile::TempDir,
    pub output_dir: tempfile::TempDir,
}

/// Assemble an in-memory application around the given template files.
/// The role directory holds a kaprodi (id 2) and a dekan (id 3).
pub fn setup(templates: &[(&str, &str)]) -> TestEnv {
    let template_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();

    for (name, body) in templates {
        std::fs::write(template_dir.path().join(name), docx(body)).unwrap();
    }

    let registry: Arc<dyn DocumentRegistry> = Arc::new(InMemoryRegistry::new());
    let directory = Arc::new(StaticDirectory::new([
        actor(2, "Kaprodi", Role::Kaprodi),
        actor(3, "Dekan", Role::Dekan),
    ]));

    let pipeline = Pipeline::new(
        TemplateStore::new(template_dir.path()),
        PdfConverter::new("soffice", Duration::from_secs(5)),
        registry.clone(),
        output_dir.path(),
    );
    let workflow = WorkflowEngine::new(registry.clone(), directory);

    let state = AppState {
        pipeline,
        workflow,
        registry: registry.clone(),
        output_dir: output_dir.path().to_path_buf(),
    };

    TestEnv {
        state,
        registry,
        template_dir,
        output_dir,
    }
}
