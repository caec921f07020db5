#[rocket::main]
async fn main() -> Result<(), rocket::Error> {
    roundtable::rocket().launch().await?;
    Ok(())
}
