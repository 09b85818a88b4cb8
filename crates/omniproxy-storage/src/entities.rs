//! Database entities: organizations, proxies, and traffic rows.
//!
//! JSON-bearing columns are stored as TEXT and (de)serialized at the store
//! layer; body columns are raw blobs of the JSON-encoded body value.

pub mod org {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "org")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub name: String,
        #[sea_orm(unique)]
        pub slug: String,
        pub plan: String,
        pub traffic_retention_days: i32,
        pub max_proxies: i32,
        pub active: bool,
        pub created_at: DateTimeUtc,
        pub updated_at: DateTimeUtc,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(has_many = "super::proxy::Entity")]
        Proxy,
    }

    impl Related<super::proxy::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Proxy.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod proxy {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "proxy")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub org_id: i64,
        pub name: String,
        pub slug: String,
        pub mode: String,
        pub port: i32,
        pub host: String,
        pub mitm_enabled: bool,
        /// JSON array of host patterns.
        pub skip_hosts: String,
        pub include_hosts: String,
        pub exclude_hosts: String,
        pub include_paths: String,
        pub exclude_paths: String,
        pub upstream: String,
        pub skip_binary: bool,
        pub active: bool,
        pub last_started_at: Option<DateTimeUtc>,
        pub created_at: DateTimeUtc,
        pub updated_at: DateTimeUtc,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::org::Entity",
            from = "Column::OrgId",
            to = "super::org::Column::Id"
        )]
        Org,
        #[sea_orm(has_many = "super::traffic::Entity")]
        Traffic,
    }

    impl Related<super::org::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Org.def()
        }
    }

    impl Related<super::traffic::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Traffic.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod traffic {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "traffic")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub proxy_id: i64,
        pub method: String,
        pub url: String,
        pub scheme: String,
        pub host: String,
        pub path: String,
        pub query: Option<String>,
        pub request_headers: Option<String>,
        pub request_body: Option<Vec<u8>>,
        pub request_body_size: i64,
        pub request_is_binary: bool,
        pub content_type: Option<String>,
        pub status_code: i32,
        pub status_text: Option<String>,
        pub response_headers: Option<String>,
        pub response_body: Option<Vec<u8>>,
        pub response_body_size: i64,
        pub response_is_binary: bool,
        pub response_content_type: Option<String>,
        pub started_at: DateTimeUtc,
        pub duration_ms: f64,
        pub ttfb_ms: Option<f64>,
        pub client_ip: Option<String>,
        pub error: Option<String>,
        pub tags: Option<String>,
        pub created_at: DateTimeUtc,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::proxy::Entity",
            from = "Column::ProxyId",
            to = "super::proxy::Column::Id"
        )]
        Proxy,
    }

    impl Related<super::proxy::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Proxy.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}
