//! Fixed store data served by the api service.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: u32,
    pub name: String,
    /// Price in cents.
    pub price: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: u32,
    pub name: String,
    pub position: String,
}

const PRODUCTS: [(&str, u32); 10] = [
    ("Mug", 1099),
    ("Bowl", 1599),
    ("Plate", 1299),
    ("Fork", 599),
    ("Spoon", 799),
    ("Knife", 1099),
    ("Cup", 899),
    ("Saucer", 699),
    ("Dish", 1499),
    ("Glass", 1199),
];

const EMPLOYEES: [(&str, &str); 10] = [
    ("Jeff", "Manager"),
    ("Benny", "Sales Associate"),
    ("Lisa", "Assistant Manager"),
    ("Craig", "Sales Associate"),
    ("Greg", "Sales Associate"),
    ("Sheila", "Product Tester"),
    ("Steven", "Clerk"),
    ("Kelly", "Clerk"),
    ("Dina", "Cashier"),
    ("Kevin", "Cashier"),
];

pub fn products() -> Vec<Product> {
    PRODUCTS
        .iter()
        .zip(1..)
        .map(|(&(name, price), id)| Product {
            id,
            name: name.to_string(),
            price,
        })
        .collect()
}

pub fn employees() -> Vec<Employee> {
    EMPLOYEES
        .iter()
        .zip(1..)
        .map(|(&(name, position), id)| Employee {
            id,
            name: name.to_string(),
            position: position.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_listing_order() {
        let products = products();
        assert_eq!(products.len(), 10);
        assert_eq!(products[0], Product { id: 1, name: "Mug".into(), price: 1099 });
        assert_eq!(products[9].id, 10);

        let employees = employees();
        assert_eq!(employees[2].name, "Lisa");
        assert_eq!(employees[2].position, "Assistant Manager");
    }

    #[test]
    fn products_serialize_with_integer_ids() {
        let json = serde_json::to_value(&products()[..1]).unwrap();
        assert_eq!(json, serde_json::json!([{ "id": 1, "name": "Mug", "price": 1099 }]));
    }
}
