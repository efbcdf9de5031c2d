use common::models::AgentRecord;
use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

/// 创建 Agent DTO
#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentDto {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub unit_id: String,
    pub job_role: String,
    pub instructions: String,
    #[serde(default)]
    pub profile_icon: Option<String>,
}

impl CreateAgentDto {
    pub fn into_record(self, id: String) -> AgentRecord {
        AgentRecord {
            id,
            name: self.name,
            unit_id: self.unit_id,
            job_role: self.job_role,
            instructions: self.instructions,
            profile_icon: self.profile_icon,
        }
    }
}

/// 更新 Agent DTO（只修改出现的字段）
#[derive(Debug, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAgentDto {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub unit_id: Option<String>,
    pub job_role: Option<String>,
    pub instructions: Option<String>,
    /// 缺省表示不修改，显式 null 表示清除
    #[serde(default, deserialize_with = "present_or_null")]
    pub profile_icon: Option<Option<String>>,
}

impl UpdateAgentDto {
    /// 把出现的字段应用到记录上
    pub fn apply(self, record: &mut AgentRecord) {
        if let Some(name) = self.name {
            record.name = name;
        }
        if let Some(unit_id) = self.unit_id {
            record.unit_id = unit_id;
        }
        if let Some(job_role) = self.job_role {
            record.job_role = job_role;
        }
        if let Some(instructions) = self.instructions {
            record.instructions = instructions;
        }
        if let Some(profile_icon) = self.profile_icon {
            record.profile_icon = profile_icon;
        }
    }
}

fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}
