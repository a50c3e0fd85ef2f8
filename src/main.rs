#[actix_web::main]
async fn main() -> std::io::Result<()> {
    fakultas_surat_server::run().await
}
