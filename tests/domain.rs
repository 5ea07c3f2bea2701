use assert_matches::assert_matches;

use dlsite_manager::domain::{ItemId, collect_item_ids, item_id_from_url, parse_item_reference};
use dlsite_manager::error::ManagerError;

#[test]
fn parse_item_id_valid() {
    let id: ItemId = "vj011538".parse().unwrap();
    assert_eq!(id.as_str(), "VJ011538");
    assert_eq!(id.prefix(), "VJ");
}

#[test]
fn parse_item_id_invalid() {
    assert_matches!("RE123".parse::<ItemId>(), Err(ManagerError::InvalidItemId(_)));
}

#[test]
fn product_url_yields_item_id() {
    let id =
        item_id_from_url("https://www.dlsite.com/maniax/work/=/product_id/RJ285384.html").unwrap();
    assert_eq!(id.as_str(), "RJ285384");
    let id = parse_item_reference(
        " https://www.dlsite.com/books/work/=/product_id/BJ123.html?locale=ja ",
    )
    .unwrap();
    assert_eq!(id.as_str(), "BJ123");
}

#[test]
fn malformed_url_is_rejected() {
    assert_matches!(
        parse_item_reference("https://www.dlsite.com/maniax/"),
        Err(ManagerError::MalformedUrl(_))
    );
}

#[test]
fn ids_are_deduplicated_across_comma_lists() {
    let ids = collect_item_ids(&["RJ2,rj1", "RJ1", ",BJ3,"]).unwrap();
    let ids: Vec<&str> = ids.iter().map(ItemId::as_str).collect();
    assert_eq!(ids, vec!["BJ3", "RJ1", "RJ2"]);
}
