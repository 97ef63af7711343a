//! Seed script for the portal dev server
//!
//! Populates the reference backend's sled store:
//! - Users: admin1 (admin), staff1 (staff), staff2fa (staff, second factor)
//! - Stock: a small feed snapshot with plates in mixed spacing/case
//! - Videos: titles that embed some of those plates, plus one orphan
//!
//! Run: cargo run --bin seed_data   (then start portal-dev-server)

use chrono::{Duration, Utc};

use dealer_portal::backend::auth::hash_password;
use dealer_portal::backend::{BackendStore, UserRecord};
use dealer_portal::config::BackendConfig;
use dealer_portal::models::{Role, StockItem, StockMedia, VehicleDetails, VideoRecord};

const SEED_PASSWORD: &str = "portal-pass";

fn vehicle(id: &str, plate: &str, make: &str, model: &str, derivative: &str, mileage: u64) -> StockItem {
    StockItem {
        id: id.to_string(),
        registration_plate: plate.to_string(),
        make: make.to_string(),
        model: model.to_string(),
        derivative: derivative.to_string(),
        mileage,
        media: vec![StockMedia {
            href: format!("https://images.example.com/{id}.jpg"),
        }],
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = BackendConfig::from_env()?;
    let store = BackendStore::open(&config.data_path)?;

    let users = [
        ("u-admin1", "admin1", Role::Admin, false, "admin1@dealer.example"),
        ("u-staff1", "staff1", Role::Staff, false, "staff1@dealer.example"),
        ("u-staff2fa", "staff2fa", Role::Staff, true, "staff2fa@dealer.example"),
    ];
    for (id, username, role, two_factor, email) in users {
        let user = UserRecord {
            id: id.to_string(),
            username: username.to_string(),
            password_hash: hash_password(SEED_PASSWORD)?,
            role,
            email: Some(email.to_string()),
            phone: None,
            two_factor,
        };
        match store.create_user(user) {
            Ok(()) => println!("✅ user {username} ({role})"),
            Err(_) => println!("↪ user {username} already exists"), // Ignore if exists
        }
    }

    let stock = vec![
        vehicle("s1", "AB12 CDE", "Ford", "Focus", "1.0 EcoBoost Titanium", 18_250),
        vehicle("s2", "xy19zzz", "Volkswagen", "Golf", "2.0 TDI GTD", 41_900),
        vehicle("s3", "LM70 PQR", "Toyota", "Yaris", "1.5 Hybrid Design", 9_400),
        vehicle("s4", "GH21 JKL", "BMW", "3 Series", "320d M Sport", 27_300),
    ];
    store.replace_stock(&stock, Utc::now())?;
    println!("✅ {} stock vehicles", stock.len());

    if !store.videos()?.is_empty() {
        println!("↪ video catalog already seeded");
        return Ok(());
    }
    let uploaded = Utc::now() - Duration::days(2);
    let videos = [
        ("v1", "Ford Focus walkaround AB12CDE", "u-staff1"),
        ("v2", "XY19ZZZ Golf GTD interior", "u-staff1"),
        ("v3", "Golf GTD test drive - XY19ZZZ", "u-admin1"),
        ("v4", "Showroom tour", "u-admin1"),
    ];
    for (i, (id, title, uploader)) in videos.iter().enumerate() {
        let video = VideoRecord {
            id: id.to_string(),
            title: title.to_string(),
            uploader_id: uploader.to_string(),
            uploader_name: Some(uploader.trim_start_matches("u-").to_string()),
            created_at: uploaded + Duration::hours(i as i64),
            view_count: (i as u64 + 1) * 7,
            video_url: format!("https://cdn.example.com/videos/{id}.mp4"),
            vehicle_details: Some(VehicleDetails::default()),
        };
        store.add_video(&video)?;
    }
    println!("✅ {} videos", videos.len());
    println!("Seed password for every user: {SEED_PASSWORD}");

    Ok(())
}
