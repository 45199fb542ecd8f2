//! 模式注册表模块，负责从JSON配置文件加载容器与字段的元数据
//!
//! 引擎本身不做任何反射或模式发现，字段路径到存储名的解析通过
//! [`FieldResolver`] 注入。

use crate::condition::{Container, ContainerKind, ContainerRole, FieldDescriptor, FieldPath};
use crate::error::{ConfigError, ConfigResult};
use crate::value::FieldType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// 后端存储中的字段名
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageName(pub String);

impl fmt::Display for StorageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 字段路径解析：`(容器, 字段路径) -> 存储名`，必须是纯函数
pub trait FieldResolver: Send + Sync {
    fn resolve(&self, container: &Container, path: &FieldPath) -> ConfigResult<StorageName>;
}

impl<F> FieldResolver for F
where
    F: Fn(&Container, &FieldPath) -> ConfigResult<StorageName> + Send + Sync,
{
    fn resolve(&self, container: &Container, path: &FieldPath) -> ConfigResult<StorageName> {
        self(container, path)
    }
}

/// 直接使用字段名作为存储名，嵌套字段以 `.` 连接
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver;

impl FieldResolver for IdentityResolver {
    fn resolve(&self, _container: &Container, path: &FieldPath) -> ConfigResult<StorageName> {
        Ok(StorageName(path.dotted_name()))
    }
}

/// 单个字段的配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    /// 存储名，缺省时使用字段名
    #[serde(default)]
    pub storage: Option<String>,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub nullable: bool,
    /// 嵌入式记录的子字段
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSchema>,
}

/// 单个容器（表/视图/集合）的配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSchema {
    #[serde(default)]
    pub storage: Option<String>,
    #[serde(default)]
    pub kind: ContainerKind,
    /// 软删除标记字段
    #[serde(default)]
    pub soft_delete_field: Option<String>,
    pub fields: BTreeMap<String, FieldSchema>,
}

fn default_separator() -> String {
    ".".to_string()
}

/// 模式注册表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRegistry {
    /// 嵌套字段存储名之间的分隔符
    #[serde(default = "default_separator")]
    pub nested_separator: String,
    pub containers: BTreeMap<String, ContainerSchema>,
}

impl SchemaRegistry {
    /// 从JSON文件加载模式注册表
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path_ref = path.as_ref();

        // 检查文件是否存在
        if !path_ref.exists() {
            return Err(ConfigError::Schema(format!(
                "配置文件不存在: {}",
                path_ref.display()
            )));
        }

        // 读取文件内容
        let content = fs::read_to_string(path_ref).map_err(|e| {
            ConfigError::Schema(format!("无法读取配置文件 {}: {}", path_ref.display(), e))
        })?;

        Self::from_json_str(&content).map_err(|e| {
            ConfigError::Schema(format!("无法解析JSON配置文件 {}: {}", path_ref.display(), e))
        })
    }

    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    fn container_schema(&self, name: &str) -> ConfigResult<&ContainerSchema> {
        self.containers
            .get(name)
            .ok_or_else(|| ConfigError::UnknownContainer {
                alias: name.to_string(),
            })
    }

    /// 按模式中声明的类型创建容器，别名默认为容器名
    pub fn container(&self, name: &str, role: ContainerRole) -> ConfigResult<Container> {
        let schema = self.container_schema(name)?;
        Ok(Container {
            alias: name.to_string(),
            underlying_name: name.to_string(),
            role,
            kind: schema.kind,
        })
    }

    /// 将 `Address.City` 形式的点分字段名解析为带类型的字段路径
    pub fn field_path(&self, container: &str, dotted: &str) -> ConfigResult<FieldPath> {
        let unknown = || ConfigError::UnknownField {
            container: container.to_string(),
            field: dotted.to_string(),
        };

        let mut fields = &self.container_schema(container)?.fields;
        let mut segments: Vec<FieldDescriptor> = Vec::new();
        for name in dotted.split('.') {
            // 只有嵌入式字段才能继续向下访问
            if segments
                .last()
                .is_some_and(|last| last.field_type != FieldType::Embedded)
            {
                return Err(unknown());
            }
            let field = fields.get(name).ok_or_else(unknown)?;
            segments.push(FieldDescriptor {
                name: name.to_string(),
                field_type: field.field_type.clone(),
                nullable: field.nullable,
            });
            fields = &field.fields;
        }
        FieldPath::nested(segments)
    }

    /// 容器的软删除标记字段（若有）
    pub fn soft_delete_field(&self, container: &str) -> ConfigResult<Option<FieldPath>> {
        match &self.container_schema(container)?.soft_delete_field {
            Some(field) => self.field_path(container, field).map(Some),
            None => Ok(None),
        }
    }

    /// 获取容器对应的存储名，未配置时使用容器名
    pub fn storage_container(&self, container: &str) -> String {
        self.containers
            .get(container)
            .and_then(|schema| schema.storage.clone())
            .unwrap_or_else(|| container.to_string())
    }
}

impl FieldResolver for SchemaRegistry {
    fn resolve(&self, container: &Container, path: &FieldPath) -> ConfigResult<StorageName> {
        let unknown = || ConfigError::UnknownField {
            container: container.underlying_name.clone(),
            field: path.dotted_name(),
        };

        let mut fields = &self.container_schema(&container.underlying_name)?.fields;
        let mut storage = Vec::with_capacity(path.segments().len());
        for segment in path.segments() {
            let field = fields.get(&segment.name).ok_or_else(unknown)?;
            storage.push(field.storage.clone().unwrap_or_else(|| segment.name.clone()));
            fields = &field.fields;
        }
        Ok(StorageName(storage.join(&self.nested_separator)))
    }
}

impl Default for SchemaRegistry {
    /// 内置的默认模式（用于测试或fallback）
    fn default() -> Self {
        let field = |storage: &str, field_type: FieldType, nullable: bool| FieldSchema {
            storage: Some(storage.to_string()),
            field_type,
            nullable,
            fields: BTreeMap::new(),
        };

        let mut orders = BTreeMap::new();
        orders.insert("Id".to_string(), field("id", FieldType::Int64, false));
        orders.insert("CustomerId".to_string(), field("customer_id", FieldType::Int64, false));
        orders.insert("ProductId".to_string(), field("product_id", FieldType::Int64, true));
        orders.insert("Status".to_string(), field("status", FieldType::Text, false));
        orders.insert("Total".to_string(), field("total", FieldType::Int64, false));
        orders.insert("Flags".to_string(), field("flags", FieldType::Int32, false));
        orders.insert("Note".to_string(), field("note", FieldType::Text, true));
        orders.insert("IsDeleted".to_string(), field("is_deleted", FieldType::Bool, false));
        let mut address = BTreeMap::new();
        address.insert("City".to_string(), field("city", FieldType::Text, false));
        address.insert("Zip".to_string(), field("zip", FieldType::Text, true));
        orders.insert(
            "ShipTo".to_string(),
            FieldSchema {
                storage: Some("ship_to".to_string()),
                field_type: FieldType::Embedded,
                nullable: true,
                fields: address,
            },
        );

        let mut customers = BTreeMap::new();
        customers.insert("Id".to_string(), field("id", FieldType::Int64, false));
        customers.insert("Name".to_string(), field("name", FieldType::Text, false));
        customers.insert("Vip".to_string(), field("vip", FieldType::Bool, false));
        customers.insert("RegionId".to_string(), field("region_id", FieldType::Int32, true));

        let mut products = BTreeMap::new();
        products.insert("Id".to_string(), field("id", FieldType::Int64, false));
        products.insert("Name".to_string(), field("name", FieldType::Text, false));
        products.insert("Price".to_string(), field("price", FieldType::Int64, false));

        let mut regions = BTreeMap::new();
        regions.insert("Id".to_string(), field("id", FieldType::Int32, false));
        regions.insert("Name".to_string(), field("name", FieldType::Text, false));

        let container = |storage: &str, soft_delete: Option<&str>, fields| ContainerSchema {
            storage: Some(storage.to_string()),
            kind: ContainerKind::Table,
            soft_delete_field: soft_delete.map(str::to_string),
            fields,
        };

        let mut containers = BTreeMap::new();
        containers.insert("Orders".to_string(), container("orders", Some("IsDeleted"), orders));
        containers.insert("Customers".to_string(), container("customers", None, customers));
        containers.insert("Products".to_string(), container("products", None, products));
        containers.insert("Regions".to_string(), container("regions", None, regions));

        Self {
            nested_separator: default_separator(),
            containers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_valid_json_schema() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{
                "nested_separator": "_",
                "containers": {{
                    "Test": {{
                        "storage": "tests",
                        "fields": {{
                            "Id": {{ "storage": "id", "type": "int64" }},
                            "Meta": {{ "type": "embedded", "fields": {{
                                "Owner": {{ "storage": "owner", "type": "text", "nullable": true }}
                            }} }}
                        }}
                    }},
                    "Run": {{ "kind": "view", "fields": {{}} }}
                }}
            }}"#
        )
        .unwrap();

        let schema = SchemaRegistry::from_json_file(file.path()).unwrap();
        assert_eq!(schema.storage_container("Test"), "tests");
        assert_eq!(schema.storage_container("Run"), "Run");
        assert_eq!(
            schema.container("Run", ContainerRole::Join).unwrap().kind,
            ContainerKind::View
        );

        let owner = schema.field_path("Test", "Meta.Owner").unwrap();
        assert!(owner.is_nullable());
        let test = schema.container("Test", ContainerRole::Root).unwrap();
        assert_eq!(schema.resolve(&test, &owner).unwrap().0, "Meta_owner");
    }

    #[test]
    fn test_invalid_json_schema() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "invalid json").unwrap();

        let result = SchemaRegistry::from_json_file(file.path());
        assert!(matches!(result, Err(ConfigError::Schema(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = SchemaRegistry::from_json_file("non_existent_schema.json");
        assert!(result.is_err());
    }

    #[test]
    fn test_default_schema() {
        let schema = SchemaRegistry::default();
        let orders = schema.container("Orders", ContainerRole::Root).unwrap();
        let city = schema.field_path("Orders", "ShipTo.City").unwrap();
        assert_eq!(schema.resolve(&orders, &city).unwrap().0, "ship_to.city");
        assert_eq!(
            schema.soft_delete_field("Orders").unwrap().unwrap().dotted_name(),
            "IsDeleted"
        );
        assert!(schema.soft_delete_field("Customers").unwrap().is_none());
    }

    #[test]
    fn test_unknown_field_and_scalar_traversal() {
        let schema = SchemaRegistry::default();
        assert!(matches!(
            schema.field_path("Orders", "Missing"),
            Err(ConfigError::UnknownField { .. })
        ));
        assert!(schema.field_path("Orders", "Status.Inner").is_err());
    }

    #[test]
    fn test_closure_resolver() {
        let resolver = |container: &Container, path: &FieldPath| -> ConfigResult<StorageName> {
            Ok(StorageName(format!("{}__{}", container.alias, path.dotted_name())))
        };
        let container = Container::root("Orders").alias("o");
        let path = FieldPath::single(FieldDescriptor::new("Status", FieldType::Text));
        assert_eq!(resolver.resolve(&container, &path).unwrap().0, "o__Status");
    }
}
