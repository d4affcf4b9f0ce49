//! 插件存档系统
//!
//! 每个插件按稳定身份对应一个持久化的XML存档文档，布局为
//! `<root>/<identity>/configuration.xml`，根元素固定为 `Savedata`。
//! 加载发生在插件 configure 之前；保存由插件在任意时刻触发，
//! 作为独立后台任务运行，失败只记日志、绝不回传给触发方。

use crate::{ModLoomError, Result, SavedataId};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// 存档文档根元素名称
pub const SAVEDATA_ROOT: &str = "Savedata";

/// 默认存档文件名
pub const DEFAULT_SAVEDATA_FILE: &str = "configuration.xml";

/// 存档文档节点
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SavedataNode {
    /// 元素名称
    pub name: String,
    /// 元素属性，保持声明顺序
    pub attributes: Vec<(String, String)>,
    /// 元素文本内容
    pub text: Option<String>,
    /// 子元素
    pub children: Vec<SavedataNode>,
}

impl SavedataNode {
    /// 创建空节点
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// 创建带文本内容的节点
    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// 设置属性
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// 追加子节点
    pub fn with_child(mut self, child: SavedataNode) -> Self {
        self.children.push(child);
        self
    }

    /// 按名称查找第一个子节点
    pub fn child(&self, name: &str) -> Option<&SavedataNode> {
        self.children.iter().find(|c| c.name == name)
    }
}

/// 存档文档 - 根元素 `Savedata` 之下的内容
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Savedata {
    /// 根元素的直接子节点
    pub children: Vec<SavedataNode>,
}

impl Savedata {
    /// 创建空文档 - 只有一个空的 `Savedata` 根元素
    pub fn empty() -> Self {
        Self::default()
    }

    /// 文档是否为空
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// 按名称查找第一个顶层子节点
    pub fn child(&self, name: &str) -> Option<&SavedataNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// 追加顶层子节点
    pub fn with_child(mut self, child: SavedataNode) -> Self {
        self.children.push(child);
        self
    }

    /// 序列化为XML文本
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        writer
            .write_event(Event::Start(BytesStart::new(SAVEDATA_ROOT)))
            .map_err(|e| ModLoomError::SavedataFormat {
                message: e.to_string(),
            })?;
        for child in &self.children {
            write_node(&mut writer, child)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(SAVEDATA_ROOT)))
            .map_err(|e| ModLoomError::SavedataFormat {
                message: e.to_string(),
            })?;

        String::from_utf8(writer.into_inner()).map_err(|e| ModLoomError::SavedataFormat {
            message: e.to_string(),
        })
    }

    /// 从XML文本解析，根元素必须是 `Savedata`
    pub fn from_xml(input: &str) -> Result<Self> {
        let mut reader = Reader::from_str(input);
        reader.trim_text(true);

        let mut document = Savedata::empty();
        let mut stack: Vec<SavedataNode> = Vec::new();
        let mut root_seen = false;

        loop {
            match reader.read_event() {
                Ok(Event::Start(start)) => {
                    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                    if !root_seen {
                        if name != SAVEDATA_ROOT {
                            return Err(ModLoomError::SavedataFormat {
                                message: format!(
                                    "expected root element '{}', found '{}'",
                                    SAVEDATA_ROOT, name
                                ),
                            });
                        }
                        root_seen = true;
                        continue;
                    }
                    stack.push(node_from_start(&start, name)?);
                }
                Ok(Event::Empty(start)) => {
                    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                    if !root_seen {
                        if name != SAVEDATA_ROOT {
                            return Err(ModLoomError::SavedataFormat {
                                message: format!(
                                    "expected root element '{}', found '{}'",
                                    SAVEDATA_ROOT, name
                                ),
                            });
                        }
                        // 空的自闭合根元素等价于空文档
                        root_seen = true;
                        continue;
                    }
                    let node = node_from_start(&start, name)?;
                    attach(&mut document, &mut stack, node);
                }
                Ok(Event::Text(text)) => {
                    let value = text
                        .unescape()
                        .map_err(|e| ModLoomError::SavedataFormat {
                            message: e.to_string(),
                        })?
                        .into_owned();
                    if !value.is_empty() {
                        if let Some(node) = stack.last_mut() {
                            node.text = Some(value);
                        }
                    }
                }
                Ok(Event::End(_)) => {
                    if let Some(node) = stack.pop() {
                        attach(&mut document, &mut stack, node);
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(ModLoomError::SavedataFormat {
                        message: e.to_string(),
                    })
                }
            }
        }

        if !root_seen {
            return Err(ModLoomError::SavedataFormat {
                message: format!("missing root element '{}'", SAVEDATA_ROOT),
            });
        }

        Ok(document)
    }
}

fn node_from_start(start: &BytesStart<'_>, name: String) -> Result<SavedataNode> {
    let mut node = SavedataNode::new(name);
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| ModLoomError::SavedataFormat {
            message: e.to_string(),
        })?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|e| ModLoomError::SavedataFormat {
                message: e.to_string(),
            })?
            .into_owned();
        node.attributes.push((key, value));
    }
    Ok(node)
}

fn attach(document: &mut Savedata, stack: &mut Vec<SavedataNode>, node: SavedataNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => document.children.push(node),
    }
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &SavedataNode) -> Result<()> {
    let mut start = BytesStart::new(node.name.as_str());
    for (key, value) in &node.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if node.text.is_none() && node.children.is_empty() {
        writer
            .write_event(Event::Empty(start))
            .map_err(format_error)?;
        return Ok(());
    }

    writer
        .write_event(Event::Start(start))
        .map_err(format_error)?;
    if let Some(text) = &node.text {
        writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(format_error)?;
    }
    for child in &node.children {
        write_node(writer, child)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(node.name.as_str())))
        .map_err(format_error)?;
    Ok(())
}

fn format_error<E: std::fmt::Display>(error: E) -> ModLoomError {
    ModLoomError::SavedataFormat {
        message: error.to_string(),
    }
}

/// 存档仓库 - 身份到文件路径的确定性映射
pub struct SavedataStore {
    /// 存档根目录
    root: PathBuf,
    /// 存档文件基础名
    file_name: String,
}

impl SavedataStore {
    /// 创建新的存档仓库
    pub fn new(root: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            file_name: file_name.into(),
        }
    }

    /// 身份对应的存档文件路径：`<root>/<identity>/<file>`
    pub fn path_for(&self, identity: &str) -> PathBuf {
        self.root.join(identity).join(&self.file_name)
    }

    /// 存档根目录
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 加载身份对应的存档文档
    ///
    /// 确保包含目录存在后读取并解析。文件缺失或格式损坏返回错误，
    /// 由监督器降级为非致命诊断加默认空文档，插件绝不因此被阻止运行。
    pub async fn load(&self, identity: &SavedataId) -> Result<Savedata> {
        let path = self.path_for(identity);
        if let Some(directory) = path.parent() {
            tokio::fs::create_dir_all(directory).await?;
        }

        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ModLoomError::SavedataLoad {
                identity: identity.clone(),
                message: e.to_string(),
            })?;

        Savedata::from_xml(&raw).map_err(|e| ModLoomError::SavedataLoad {
            identity: identity.clone(),
            message: e.to_string(),
        })
    }

    /// 保存身份对应的存档文档
    pub async fn save(&self, identity: &SavedataId, document: &Savedata) -> Result<()> {
        let path = self.path_for(identity);
        if let Some(directory) = path.parent() {
            tokio::fs::create_dir_all(directory).await?;
        }

        let xml = document.to_xml()?;
        tokio::fs::write(&path, xml).await?;
        debug!("Savedata for '{}' written to {:?}", identity, path);
        Ok(())
    }

    /// 调度一次后台保存
    ///
    /// 相对触发方即发即忘：写入失败记 warn 日志后丢弃，永不阻塞
    /// 也永不回传。同一身份的并发保存为最后写入生效。
    pub fn save_in_background(self: &Arc<Self>, identity: &SavedataId, document: Savedata) {
        let store = Arc::clone(self);
        let identity = identity.clone();
        tokio::spawn(async move {
            if let Err(e) = store.save(&identity, &document).await {
                warn!("Background savedata write for '{}' failed: {}", identity, e);
            }
        });
    }
}
